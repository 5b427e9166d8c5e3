//! Result interpretation
//!
//! Turns the model checker's JSON UI output into a [`Verdict`]. Malformed
//! output is always an error, never a failed verification. So is a fault
//! raised while a requires or ensures clause is being evaluated: that is an
//! ill-formed contract, not a property of the method.

mod trace;

pub use trace::{TraceStep, location_line, reconstruct, source_name};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::ast::{CheckKind, ClauseKind};
use crate::emit::TraceMetadata;
use crate::runner::EXIT_SUCCESS;

#[derive(Debug, Error)]
pub enum OutputParseError {
    #[error("backend output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend output is not a JSON message array")]
    NotAnArray,

    #[error("backend output has no result section")]
    MissingResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Success,
    Failed,
    Error,
}

/// What a failed property was checking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PropertyKind {
    Postcondition,
    UserAssertion,
    Exception,
    /// Runtime fault while evaluating a contract clause
    IllFormedContract(ClauseKind),
    Other,
}

impl std::fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyKind::Postcondition => write!(f, "postcondition"),
            PropertyKind::UserAssertion => write!(f, "assertion"),
            PropertyKind::Exception => write!(f, "exception"),
            PropertyKind::IllFormedContract(clause) => write!(f, "ill-formed {clause} clause"),
            PropertyKind::Other => write!(f, "property"),
        }
    }
}

/// Counterexample for one violated property
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterexampleTrace {
    pub property: String,
    pub description: String,
    pub kind: PropertyKind,
    /// Source text of the violated condition, when it is a known assertion
    pub condition: Option<String>,
    pub original_line: Option<u32>,
    pub steps: Vec<TraceStep>,
}

impl CounterexampleTrace {
    /// Variable assigned by the last assignment before the violation
    pub fn last_assignment(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .filter(|s| !s.is_failure)
            .find_map(|s| s.variable.as_deref())
    }
}

impl std::fmt::Display for CounterexampleTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            PropertyKind::IllFormedContract(_) => write!(f, "{}", self.kind)?,
            _ => write!(f, "{} violated", self.kind)?,
        }
        if let Some(line) = self.original_line {
            write!(f, " at line {line}")?;
        }
        match &self.condition {
            Some(text) => writeln!(f, ": {text}")?,
            None => writeln!(f, ": {}", self.description)?,
        }
        for step in self.steps.iter().filter(|s| !s.synthetic && !s.is_failure) {
            writeln!(f, "    {step}")?;
        }
        Ok(())
    }
}

/// Outcome of one backend run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub status: Status,
    pub traces: Vec<CounterexampleTrace>,
    pub errors: Vec<String>,
    /// Number of properties the backend checked
    pub properties: usize,
}

impl Verdict {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            traces: Vec::new(),
            errors: vec![message.into()],
            properties: 0,
        }
    }
}

/// Interprets a completed run; parse failures become an error verdict
pub fn interpret(stdout: &str, exit_code: Option<i32>, meta: &TraceMetadata) -> Verdict {
    match parse(stdout, exit_code, meta) {
        Ok(verdict) => verdict,
        Err(e) => {
            debug!(error = %e, "unparseable backend output");
            Verdict::error(e.to_string())
        }
    }
}

pub fn parse(stdout: &str, exit_code: Option<i32>, meta: &TraceMetadata) -> Result<Verdict, OutputParseError> {
    let doc: Value = serde_json::from_str(stdout)?;
    let messages = doc.as_array().ok_or(OutputParseError::NotAnArray)?;

    let errors: Vec<String> = messages
        .iter()
        .filter(|m| m.get("messageType").and_then(Value::as_str) == Some("ERROR"))
        .filter_map(|m| m.get("messageText").and_then(Value::as_str))
        .map(|text| text.trim().to_string())
        .collect();

    let Some(results) = messages
        .iter()
        .find_map(|m| m.get("result").and_then(Value::as_array))
    else {
        if errors.is_empty() {
            return Err(OutputParseError::MissingResult);
        }
        return Ok(Verdict {
            status: Status::Error,
            traces: Vec::new(),
            errors,
            properties: 0,
        });
    };

    let traces: Vec<CounterexampleTrace> = results
        .iter()
        .filter(|r| r.get("status").and_then(Value::as_str) == Some("FAILURE"))
        .map(|r| counterexample(r, meta))
        .collect();

    let faults: Vec<String> = traces
        .iter()
        .filter(|t| matches!(t.kind, PropertyKind::IllFormedContract(_)))
        .map(|t| match t.original_line {
            Some(line) => format!("{} near line {line}: {}", t.kind, t.description),
            None => format!("{}: {}", t.kind, t.description),
        })
        .collect();
    if !faults.is_empty() {
        debug!(count = faults.len(), "contract evaluation faulted");
        let mut errors = errors;
        errors.extend(faults);
        return Ok(Verdict {
            status: Status::Error,
            traces,
            errors,
            properties: results.len(),
        });
    }

    let status = if !traces.is_empty() {
        Status::Failed
    } else if exit_code == Some(EXIT_SUCCESS) {
        Status::Success
    } else {
        Status::Failed
    };

    Ok(Verdict {
        status,
        traces,
        errors,
        properties: results.len(),
    })
}

fn counterexample(result: &Value, meta: &TraceMetadata) -> CounterexampleTrace {
    let property = str_field(result, "property");
    let description = str_field(result, "description");
    let steps = result
        .get("trace")
        .and_then(Value::as_array)
        .map(|steps| reconstruct(steps, meta))
        .unwrap_or_default();

    // Failure step location, falling back to the property's own location
    let emitted_line = steps
        .iter()
        .rev()
        .find(|s| s.is_failure)
        .and_then(|s| s.emitted_line)
        .or_else(|| result.get("sourceLocation").and_then(location_line));
    let assertion = emitted_line
        .and_then(|line| meta.assertion_at(line))
        .filter(|_| is_assertion_property(&property));
    let block = emitted_line.and_then(|line| meta.contract_block_at(line));

    let kind = match (assertion.map(|a| a.kind), block) {
        (Some(CheckKind::Ensures), _) => PropertyKind::Postcondition,
        (Some(CheckKind::User), _) => PropertyKind::UserAssertion,
        (_, Some(block)) => PropertyKind::IllFormedContract(block.kind),
        (Some(CheckKind::Requires), None) => PropertyKind::Other,
        (None, None) if is_exception(&property, &description) => PropertyKind::Exception,
        (None, None) => PropertyKind::Other,
    };

    CounterexampleTrace {
        property,
        description,
        kind,
        condition: assertion.map(|a| a.text.clone()),
        original_line: assertion
            .and_then(|a| a.original_line)
            .or_else(|| emitted_line.and_then(|l| meta.original_line(l))),
        steps,
    }
}

/// Runtime checks (bounds, null, division) share the line of an assertion
/// they occur in but carry their own property names
fn is_assertion_property(property: &str) -> bool {
    property.is_empty() || property.contains(".assertion.")
}

fn is_exception(property: &str, description: &str) -> bool {
    property.contains("exception") || description.to_ascii_lowercase().contains("exception")
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{AssertionInfo, ContractBlock};

    fn meta() -> TraceMetadata {
        let mut meta = TraceMetadata::default();
        meta.record_line(12, 3);
        meta.assertions.insert(
            12,
            AssertionInfo {
                text: "\\result > 0".into(),
                vars: vec!["__result".into()],
                kind: CheckKind::Ensures,
                original_line: Some(3),
            },
        );
        meta
    }

    const SUCCESS: &str = r#"[
        {"program": "JBMC 5.95"},
        {"messageText": "Starting", "messageType": "STATUS-MESSAGE"},
        {"result": [{"property": "java::T.f:()I.assertion.1", "description": "assertion", "status": "SUCCESS"}]},
        {"cProverStatus": "success"}
    ]"#;

    const FAILURE: &str = r#"[
        {"result": [
            {"property": "java::T.f:()I.assertion.1", "description": "assertion", "status": "FAILURE",
             "trace": [
                {"stepType": "assignment", "hidden": false, "lhs": "__result",
                 "sourceLocation": {"line": "10"}, "value": {"data": "0"}},
                {"stepType": "failure", "property": "java::T.f:()I.assertion.1",
                 "sourceLocation": {"line": "12"}}
             ]},
            {"property": "java::T.f:()I.null-pointer-exception.1", "description": "Null pointer check",
             "status": "FAILURE", "trace": []}
        ]},
        {"cProverStatus": "failure"}
    ]"#;

    #[test]
    fn test_success() {
        let verdict = interpret(SUCCESS, Some(0), &meta());
        assert_eq!(verdict.status, Status::Success);
        assert_eq!(verdict.properties, 1);
        assert!(verdict.traces.is_empty());
    }

    #[test]
    fn test_failure_with_trace() {
        let verdict = interpret(FAILURE, Some(10), &meta());
        assert_eq!(verdict.status, Status::Failed);
        assert_eq!(verdict.traces.len(), 2);

        let post = &verdict.traces[0];
        assert_eq!(post.kind, PropertyKind::Postcondition);
        assert_eq!(post.condition.as_deref(), Some("\\result > 0"));
        assert_eq!(post.original_line, Some(3));
        assert_eq!(post.last_assignment(), Some("\\result"));

        assert_eq!(verdict.traces[1].kind, PropertyKind::Exception);
    }

    #[test]
    fn test_malformed_output_is_error() {
        let verdict = interpret("[{\"result\": [", Some(0), &meta());
        assert_eq!(verdict.status, Status::Error);
        assert_eq!(verdict.errors.len(), 1);

        let err = parse("{}", Some(0), &meta()).unwrap_err();
        assert!(matches!(err, OutputParseError::NotAnArray));
        let err = parse("[{\"program\": \"JBMC\"}]", Some(0), &meta()).unwrap_err();
        assert!(matches!(err, OutputParseError::MissingResult));
    }

    #[test]
    fn test_backend_errors_without_result() {
        let out = r#"[{"messageText": "the program has no entry point", "messageType": "ERROR"}]"#;
        let verdict = interpret(out, Some(6), &meta());
        assert_eq!(verdict.status, Status::Error);
        assert_eq!(verdict.errors, vec!["the program has no entry point"]);
    }

    #[test]
    fn test_anomalous_exit_without_failures_is_failed() {
        let verdict = interpret(SUCCESS, Some(6), &meta());
        assert_eq!(verdict.status, Status::Failed);
    }

    #[test]
    fn test_fault_inside_contract_is_error() {
        let mut meta = meta();
        meta.record_line(5, 2);
        meta.contract_blocks.push(ContractBlock {
            kind: ClauseKind::Requires,
            start_line: 3,
            end_line: 8,
        });
        let out = r#"[{"result": [
            {"property": "java::T.f:([I)I.array-index-out-of-bounds-high.1",
             "description": "Array index should be < length", "status": "FAILURE",
             "trace": [{"stepType": "failure", "sourceLocation": {"line": "5"}}]}
        ]}]"#;
        let verdict = interpret(out, Some(10), &meta);
        assert_eq!(verdict.status, Status::Error);
        assert_eq!(verdict.traces[0].kind, PropertyKind::IllFormedContract(ClauseKind::Requires));
        assert_eq!(
            verdict.errors,
            vec!["ill-formed requires clause near line 2: Array index should be < length"]
        );
    }

    #[test]
    fn test_bounds_check_on_ensures_line_is_not_postcondition() {
        let mut meta = meta();
        meta.contract_blocks.push(ContractBlock {
            kind: ClauseKind::Ensures,
            start_line: 11,
            end_line: 14,
        });
        let out = r#"[{"result": [
            {"property": "java::T.f:()I.null-pointer-exception.2", "description": "Null pointer check",
             "status": "FAILURE", "trace": [{"stepType": "failure", "sourceLocation": {"line": "12"}}]},
            {"property": "java::T.f:()I.assertion.1", "description": "assertion", "status": "SUCCESS"}
        ]}]"#;
        let verdict = interpret(out, Some(10), &meta);
        assert_eq!(verdict.status, Status::Error);
        assert_eq!(verdict.traces[0].kind, PropertyKind::IllFormedContract(ClauseKind::Ensures));
        assert!(verdict.traces[0].to_string().starts_with("ill-formed ensures clause at line 3"));

        // the postcondition assertion itself on that line still fails normally
        let verdict = interpret(FAILURE, Some(10), &meta);
        assert_eq!(verdict.traces[0].kind, PropertyKind::Postcondition);
    }

    #[test]
    fn test_display_hides_synthetic_steps() {
        let verdict = interpret(FAILURE, Some(10), &meta());
        let text = verdict.traces[0].to_string();
        assert!(text.starts_with("postcondition violated at line 3: \\result > 0"));
        // the return holder assignment sits on an unmapped line
        assert!(!text.contains("\\result = 0"));
    }
}
