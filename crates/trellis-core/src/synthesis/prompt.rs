//! Prompt assembly for the designer and repair model calls.
//!
//! The wording here is a configuration asset, not logic: the pipeline's
//! contract with the model is the structured output schema it demands, and
//! the gates validate everything that comes back. Tests assert structure
//! (catalogue present, rules stated), never prose.

use trellis_types::catalog::ActionCatalog;

use crate::repair::RepairContext;

/// System prompt for the Stage-1 design call.
pub fn design_system_prompt(catalog: &ActionCatalog) -> String {
    format!(
        "You design automation workflows as structured JSON. Decompose the \
         user's request into a directed graph of typed steps.\n\
         \n\
         Rules:\n\
         - Use only the catalogued actions listed below; never invent a \
         plugin or action name.\n\
         - Reference values exclusively through {{{{input.name}}}}, \
         {{{{stepN.field}}}}, or {{{{loop.item.field}}}} expressions. Never \
         emit $PLACEHOLDER tokens.\n\
         - Input names are snake_case.\n\
         - Give every step a unique id (step1, step2, ...) and a clear name.\n\
         - Prefer a flat sequence; use loop steps only for genuine per-item \
         work, never to wrap a single AI call.\n\
         - Declare only inputs the user must supply; derive everything else \
         from step outputs.\n\
         \n\
         Available actions:\n{}\n",
        catalog.condensed_summary()
    )
}

/// User prompt for the Stage-1 design call.
pub fn design_user_prompt(request: &str) -> String {
    format!("Design a workflow for this request:\n\n{request}")
}

/// System prompt for the single-step repair call.
pub fn repair_system_prompt() -> String {
    "You repair one broken step of an automation workflow. Return only the \
     corrected step as structured JSON, keeping its id and its place in the \
     graph. Change nothing beyond what the error requires. Use only \
     {{input.name}}, {{stepN.field}}, or {{loop.item.field}} references and \
     never $PLACEHOLDER tokens."
        .to_string()
}

/// User prompt for the single-step repair call: the failing step, its
/// validation error, the surrounding steps, and the parameter schema when
/// the step is an action.
pub fn repair_user_prompt(context: &RepairContext, original_request: &str) -> String {
    let mut prompt = format!(
        "The workflow was generated for this request:\n{original_request}\n\n\
         This step failed validation:\n{}\n\nError: {}\n",
        context.step_json, context.error
    );
    if !context.predecessors.is_empty() {
        prompt.push_str(&format!(
            "\nPreceding steps (for reference context):\n{}\n",
            context.predecessors.join("\n")
        ));
    }
    if !context.successors.is_empty() {
        prompt.push_str(&format!(
            "\nFollowing steps (their references to this step must keep working):\n{}\n",
            context.successors.join("\n")
        ));
    }
    if let Some(schema) = &context.parameter_schema {
        prompt.push_str(&format!(
            "\nFull parameter schema for {}.{}:\n{schema}\n",
            context.plugin.as_deref().unwrap_or(""),
            context.action.as_deref().unwrap_or(""),
        ));
    }
    prompt.push_str("\nReturn the corrected step only.");
    prompt
}
