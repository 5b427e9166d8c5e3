//! Counterexample trace reconstruction
//!
//! Maps backend trace steps on the emitted program back to source lines and
//! source-level variable names.

use serde::Serialize;
use serde_json::Value;

use crate::emit::{MethodInfo, TraceMetadata};
use crate::encode::RESULT_VAR;

/// One step of a counterexample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceStep {
    pub emitted_line: Option<u32>,
    pub original_line: Option<u32>,
    /// Source-level name of the assigned variable; `None` for the failure step
    pub variable: Option<String>,
    pub value: Option<String>,
    /// Introduced by the translation rather than written by the user
    pub synthetic: bool,
    pub is_failure: bool,
}

impl std::fmt::Display for TraceStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.original_line {
            Some(line) => write!(f, "line {line:>4}: ")?,
            None => write!(f, "synthetic: ")?,
        }
        match (&self.variable, &self.value) {
            (Some(var), Some(value)) => write!(f, "{var} = {value}"),
            (Some(var), None) => write!(f, "{var} = ?"),
            _ => write!(f, "violation"),
        }
    }
}

/// Reconstructs the user-visible steps of a backend trace
pub fn reconstruct(steps: &[Value], meta: &TraceMetadata) -> Vec<TraceStep> {
    let mut out = Vec::new();
    for step in steps {
        if step.get("hidden").and_then(Value::as_bool) == Some(true) {
            continue;
        }
        let emitted_line = step.get("sourceLocation").and_then(location_line);
        match step.get("stepType").and_then(Value::as_str) {
            Some("assignment") => {
                let Some(lhs) = step.get("lhs").and_then(Value::as_str) else {
                    continue;
                };
                // steps without a location are kept but count as synthetic
                let method = emitted_line.and_then(|line| meta.method_at(line));
                let Some(variable) = source_name(lhs, method) else {
                    continue;
                };
                let original_line = emitted_line.and_then(|line| meta.original_line(line));
                let visible = emitted_line.is_some_and(|line| meta.is_user_assignment(line, &variable))
                    || variable == "\\result"
                    || method.is_some_and(|m| m.params.contains(&variable));
                out.push(TraceStep {
                    emitted_line,
                    original_line,
                    value: step
                        .get("value")
                        .and_then(|v| v.get("data"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    variable: Some(variable),
                    synthetic: original_line.is_none() || !visible,
                    is_failure: false,
                });
            }
            Some("failure") => {
                let original_line = emitted_line.and_then(|l| meta.original_line(l));
                out.push(TraceStep {
                    emitted_line,
                    original_line,
                    variable: None,
                    value: None,
                    synthetic: original_line.is_none(),
                    is_failure: true,
                });
            }
            _ => {}
        }
    }
    out
}

/// Emitted line of a `sourceLocation` object; the backend writes it as a string
pub fn location_line(location: &Value) -> Option<u32> {
    match location.get("line")? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    }
}

/// Source-level name of a backend left-hand side
///
/// Returns `None` for backend internals that have no counterpart in the
/// program.
pub fn source_name(lhs: &str, method: Option<&MethodInfo>) -> Option<String> {
    if lhs.starts_with("__CPROVER") || lhs.starts_with("dynamic_object") || lhs.starts_with("malloc") {
        return None;
    }
    // `java::Class.method:(I)I::1::x` keeps only the last segment
    let name = lhs.rsplit("::").next().unwrap_or(lhs);
    let name = name.strip_prefix("this.").unwrap_or(name);
    let name = match name.find(['!', '@', '#']) {
        Some(0) => return None,
        Some(end) => &name[..end],
        None => name,
    };
    if name.is_empty() {
        return None;
    }
    if name == RESULT_VAR {
        return Some("\\result".to_string());
    }
    if let Some(slot) = argument_slot(name) {
        let Some(method) = method else {
            return Some(name.to_string());
        };
        let index = if method.is_static {
            slot
        } else if slot == 0 {
            return Some("this".to_string());
        } else {
            slot - 1
        };
        return method.params.get(index).cloned().or_else(|| Some(name.to_string()));
    }
    Some(name.to_string())
}

/// Parameter slot of `argN` with an optional one-letter type suffix
fn argument_slot(name: &str) -> Option<usize> {
    let rest = name.strip_prefix("arg")?;
    let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let suffix = &rest[digits_end..];
    if suffix.len() > 1 || !suffix.chars().all(|c| c.is_ascii_lowercase()) {
        return None;
    }
    rest[..digits_end].parse().ok()
}
