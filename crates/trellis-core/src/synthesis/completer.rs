//! Stage 2: deterministic design completion.
//!
//! Pure code, no external calls. Three passes over the Stage-1 output:
//!
//! (a) discover `{{input.X}}` references by regex over the serialized
//!     steps and synthesize the missing `RequiredInput` entries (one per
//!     distinct name, never duplicated);
//! (b) infer each input's type from naming conventions and build a label
//!     by title-casing `_`-separated words, preserving a fixed acronym
//!     allow-list;
//! (c) walk the parsed step tree (including loop and scatter bodies) and
//!     rewrite references to `ai_processing` steps that lack the `data.`
//!     prefix, recording a human-readable fix per rewrite.
//!
//! Running `complete` on its own output is a no-op: zero new inputs, zero
//! new fixes.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use trellis_types::workflow::{InputType, RequiredInput, WorkflowDesign};

use crate::expression::{PathSeg, Reference, find_spans, parse_reference};

use super::walk::{for_each_step, for_each_step_mut, visit_strings_mut};

/// `{{input.<snake_case_name>}}` discovery pattern.
static INPUT_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*input\.([a-z_][a-z0-9_]*)\s*\}\}").expect("input reference regex is valid")
});

/// Acronyms kept uppercase in synthesized labels.
const LABEL_ACRONYMS: [&str; 9] = [
    "ID", "URL", "API", "PDF", "HTML", "CSV", "JSON", "XML", "SQL",
];

/// Path heads the model uses to address AI output; the rewrite keeps them
/// under `data.` instead of collapsing them to `result`.
const AI_OUTPUT_ALIASES: [&str; 5] = ["result", "response", "output", "summary", "analysis"];

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What Stage 2 did to a design.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub design: WorkflowDesign,
    /// Inputs synthesized in this pass (already present in `design`).
    pub new_inputs: Vec<RequiredInput>,
    /// Human-readable descriptions of reference rewrites.
    pub fixes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Complete a Stage-1 design: synthesize missing required inputs and
/// repair `ai_processing` references lacking the `data.` prefix.
pub fn complete(design: &WorkflowDesign) -> CompletionOutcome {
    let mut design = design.clone();
    let mut fixes = Vec::new();

    // (a) discover input references over the serialized step tree.
    let serialized =
        serde_json::to_string(&design.steps).expect("workflow steps serialize to JSON");
    let declared: HashSet<String> = design
        .required_inputs
        .iter()
        .map(|i| i.name.clone())
        .collect();
    let mut seen = HashSet::new();
    let mut new_inputs = Vec::new();
    for capture in INPUT_REF_RE.captures_iter(&serialized) {
        let name = capture[1].to_string();
        if declared.contains(&name) || !seen.insert(name.clone()) {
            continue;
        }
        let label = synthesize_label(&name);
        new_inputs.push(RequiredInput {
            description: format!("Value for {label}"),
            reasoning: format!("Referenced as {{{{input.{name}}}}} in the workflow steps"),
            name,
            input_type: infer_input_type(&capture[1]),
            label,
            required: true,
        });
    }
    design.required_inputs.extend(new_inputs.iter().cloned());

    // (c) rewrite bare references to AI steps over the parsed tree.
    let mut ai_ids: HashSet<String> = HashSet::new();
    for_each_step(&design.steps, &mut |step, _| {
        if step.is_ai() {
            ai_ids.insert(step.id.clone());
        }
    });
    for_each_step_mut(&mut design.steps, &mut |step, _| {
        let step_id = step.id.clone();
        visit_strings_mut(step, &mut |text| {
            if let Some((rewritten, span_fixes)) = rewrite_ai_references(text, &ai_ids) {
                *text = rewritten;
                for fix in span_fixes {
                    fixes.push(format!("{fix} (in step {step_id})"));
                }
            }
        });
    });

    CompletionOutcome {
        design,
        new_inputs,
        fixes,
    }
}

// ---------------------------------------------------------------------------
// Type and label inference
// ---------------------------------------------------------------------------

/// Infer a `RequiredInput` type from the input's name. First match wins.
pub fn infer_input_type(name: &str) -> InputType {
    const NUMBER_HINTS: [&str; 7] = ["count", "limit", "max", "min", "amount", "quantity", "size"];
    const FILE_HINTS: [&str; 3] = ["file", "attachment", "document"];
    const JSON_HINTS: [&str; 4] = ["json", "config", "data", "payload"];

    if name.contains("email") {
        InputType::Email
    } else if NUMBER_HINTS.iter().any(|h| name.contains(h)) || name.contains("number") {
        InputType::Number
    } else if name.contains("url") || name.contains("link") {
        InputType::Url
    } else if FILE_HINTS.iter().any(|h| name.contains(h)) {
        InputType::File
    } else if JSON_HINTS.iter().any(|h| name.contains(h)) {
        InputType::Json
    } else {
        InputType::Text
    }
}

/// Build a display label from a snake_case name: `_`-split, title-case,
/// acronyms from the allow-list kept uppercase.
pub fn synthesize_label(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let upper = word.to_uppercase();
            if LABEL_ACRONYMS.contains(&upper.as_str()) {
                upper
            } else {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Reference rewriting
// ---------------------------------------------------------------------------

/// Rewrite every `{{<ai_step>.<path>}}` span whose path lacks the `data.`
/// prefix. A leading alias segment is kept under `data.`; any other path
/// collapses to `data.result`. Returns `None` when nothing changed.
fn rewrite_ai_references(
    text: &str,
    ai_ids: &HashSet<String>,
) -> Option<(String, Vec<String>)> {
    let spans = find_spans(text);
    if spans.is_empty() {
        return None;
    }

    let mut out = String::new();
    let mut cursor = 0;
    let mut fixes = Vec::new();
    for span in &spans {
        out.push_str(&text[cursor..span.start]);
        cursor = span.end;

        let original = span.inner.trim();
        match parse_reference(&span.inner) {
            Ok(Reference::Step { step_id, path })
                if ai_ids.contains(&step_id) && !starts_with_data(&path) =>
            {
                let new_path = match path.first() {
                    Some(PathSeg::Key(head))
                        if AI_OUTPUT_ALIASES.contains(&head.as_str()) =>
                    {
                        let mut p = vec![PathSeg::Key("data".to_string())];
                        p.extend(path.iter().cloned());
                        p
                    }
                    _ => vec![
                        PathSeg::Key("data".to_string()),
                        PathSeg::Key("result".to_string()),
                    ],
                };
                let rewritten = render_reference(&step_id, &new_path);
                fixes.push(format!(
                    "Rewrote '{{{{{original}}}}}' to '{{{{{rewritten}}}}}' so the AI step's output resolves"
                ));
                out.push_str("{{");
                out.push_str(&rewritten);
                out.push_str("}}");
            }
            _ => out.push_str(&text[span.start..span.end]),
        }
    }
    out.push_str(&text[cursor..]);

    if fixes.is_empty() {
        None
    } else {
        Some((out, fixes))
    }
}

fn starts_with_data(path: &[PathSeg]) -> bool {
    matches!(path.first(), Some(PathSeg::Key(k)) if k == "data")
}

fn render_reference(step_id: &str, path: &[PathSeg]) -> String {
    let mut out = step_id.to_string();
    for seg in path {
        match seg {
            PathSeg::Key(key)
                if key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
            {
                out.push('.');
                out.push_str(key);
            }
            PathSeg::Key(key) => {
                out.push_str("['");
                out.push_str(key);
                out.push_str("']");
            }
            PathSeg::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
