//! Source mapping recorded while emitting the translated program

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ast::{CheckKind, ClauseKind};

/// Everything the trace reconstructor needs to map backend output on the
/// emitted program back to the user's source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceMetadata {
    /// Emitted line to original line; emitted lines absent here are synthetic
    pub line_map: BTreeMap<u32, u32>,
    /// Original line to every emitted line derived from it
    pub reverse_map: BTreeMap<u32, Vec<u32>>,
    /// Assertions by emitted line
    pub assertions: BTreeMap<u32, AssertionInfo>,
    /// User-visible variables assigned on each emitted line
    pub assignments: BTreeMap<u32, Vec<String>>,
    pub methods: Vec<MethodInfo>,
    /// Emitted line ranges that evaluate a requires or ensures clause
    #[serde(default)]
    pub contract_blocks: Vec<ContractBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractBlock {
    pub kind: ClauseKind,
    pub start_line: u32,
    pub end_line: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionInfo {
    /// Source text of the checked condition
    pub text: String,
    /// Variables referenced by the emitted condition
    pub vars: Vec<String>,
    pub kind: CheckKind,
    pub original_line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodInfo {
    /// Binary class name, `Outer$Inner` for nested classes
    pub class: String,
    pub name: String,
    /// Emitted line of the declaration
    pub entry_line: u32,
    /// Last emitted line of the body
    pub end_line: u32,
    pub original_line: Option<u32>,
    pub is_static: bool,
    pub params: Vec<String>,
    pub locals: Vec<String>,
}

impl TraceMetadata {
    pub fn record_line(&mut self, emitted: u32, original: u32) {
        self.line_map.insert(emitted, original);
        let lines = self.reverse_map.entry(original).or_default();
        if !lines.contains(&emitted) {
            lines.push(emitted);
        }
    }

    pub fn original_line(&self, emitted: u32) -> Option<u32> {
        self.line_map.get(&emitted).copied()
    }

    pub fn emitted_lines(&self, original: u32) -> &[u32] {
        self.reverse_map
            .get(&original)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn assertion_at(&self, emitted: u32) -> Option<&AssertionInfo> {
        self.assertions.get(&emitted)
    }

    /// Whether `var` is assigned by user code on `emitted`
    pub fn is_user_assignment(&self, emitted: u32, var: &str) -> bool {
        self.assignments
            .get(&emitted)
            .is_some_and(|vars| vars.iter().any(|v| v == var))
    }

    /// Method whose emitted body contains `emitted`
    pub fn method_at(&self, emitted: u32) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .filter(|m| m.entry_line <= emitted && emitted <= m.end_line)
            // innermost for nested classes
            .max_by_key(|m| m.entry_line)
    }

    /// Contract block enclosing `emitted`
    pub fn contract_block_at(&self, emitted: u32) -> Option<&ContractBlock> {
        self.contract_blocks
            .iter()
            .find(|b| b.start_line <= emitted && emitted <= b.end_line)
    }

    /// Method by class and name, first overload wins
    pub fn method_named(&self, class: &str, name: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.name == name && (m.class == class || m.class.ends_with(&format!(".{class}"))))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
