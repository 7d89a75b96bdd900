//! The validation gate pipeline.
//!
//! Three gates run strictly in order: structural (post-Stage 1),
//! parameter (post-Stage 2), semantic (post-Gate 2). Each returns a
//! `GateReport`; a failed gate blocks progression, warnings never do.
//! Gate 2 failures route through the repair loop before being final.

pub mod parameters;
pub mod semantic;
pub mod structural;

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use trellis_types::workflow::{WorkflowDesign, WorkflowStep};

use crate::synthesis::walk::for_each_step;

/// Bare `$PLACEHOLDER` tokens: the designer contract forbids them
/// anywhere in the tree.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[A-Z][A-Z0-9_]*").expect("placeholder regex is valid"));

/// Any-case input references, for snake_case auditing.
static INPUT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*input\.([A-Za-z][A-Za-z0-9_]*)\s*\}\}").expect("input name regex is valid")
});

static SNAKE_CASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("snake_case regex is valid"));

/// Transform operations the interpreter implements. Anything else draws a
/// Gate-2 warning.
pub const KNOWN_TRANSFORM_OPS: [&str; 9] = [
    "map", "filter", "extract", "count", "join", "limit", "sort", "flatten", "merge",
];

/// Every distinct `$PLACEHOLDER` token in the serialized step tree.
pub(crate) fn placeholder_tokens(design: &WorkflowDesign) -> Vec<String> {
    let serialized =
        serde_json::to_string(&design.steps).expect("workflow steps serialize to JSON");
    let mut seen = HashSet::new();
    PLACEHOLDER_RE
        .find_iter(&serialized)
        .map(|m| m.as_str().to_string())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Input names referenced anywhere in the tree that are not snake_case.
pub(crate) fn non_snake_case_input_names(design: &WorkflowDesign) -> Vec<String> {
    let serialized =
        serde_json::to_string(&design.steps).expect("workflow steps serialize to JSON");
    let mut seen = HashSet::new();
    INPUT_NAME_RE
        .captures_iter(&serialized)
        .map(|c| c[1].to_string())
        .filter(|name| !SNAKE_CASE_RE.is_match(name))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// All step ids in the tree (including nested bodies), plus any ids seen
/// more than once.
pub(crate) fn collect_ids(steps: &[WorkflowStep]) -> (HashSet<String>, Vec<String>) {
    let mut ids = HashSet::new();
    let mut duplicates = Vec::new();
    for_each_step(steps, &mut |step, _| {
        if !ids.insert(step.id.clone()) {
            duplicates.push(step.id.clone());
        }
    });
    (ids, duplicates)
}

/// Ids referenced as conditional branch targets anywhere in the tree.
pub(crate) fn branch_target_ids(steps: &[WorkflowStep]) -> HashSet<String> {
    let mut targets = HashSet::new();
    for_each_step(steps, &mut |step, _| {
        for t in step.branch_targets() {
            targets.insert(t.to_string());
        }
    });
    targets
}
