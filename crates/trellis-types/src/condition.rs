//! Condition grammar for conditional steps and `executeIf` guards.
//!
//! A `Condition` is a recursive tagged union: a `simple` leaf compares one
//! resolved field against a literal value, and `complex_and`/`complex_or`/
//! `complex_not` combine sub-conditions. Operator applicability is
//! type-directed: the validation gates reject a numeric comparator applied
//! to a string literal instead of deferring the mismatch to runtime.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// A boolean condition over workflow values.
///
/// `field` in the `simple` variant is a template expression (usually a
/// single `{{...}}` reference) resolved against the run scope before the
/// operator is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Leaf comparison: `field <operator> value`.
    Simple {
        field: String,
        operator: ConditionOperator,
        value: Value,
    },
    /// All sub-conditions must hold.
    ComplexAnd { conditions: Vec<Condition> },
    /// At least one sub-condition must hold.
    ComplexOr { conditions: Vec<Condition> },
    /// Negation of the inner condition.
    ComplexNot { condition: Box<Condition> },
}

impl Condition {
    /// Iterate over every `simple` leaf in this condition tree.
    pub fn leaves(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            Condition::Simple { .. } => out.push(self),
            Condition::ComplexAnd { conditions } | Condition::ComplexOr { conditions } => {
                for c in conditions {
                    c.collect_leaves(out);
                }
            }
            Condition::ComplexNot { condition } => condition.collect_leaves(out),
        }
    }
}

// ---------------------------------------------------------------------------
// ConditionOperator
// ---------------------------------------------------------------------------

/// Comparison operator for `simple` conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionOperator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "starts_with")]
    StartsWith,
    #[serde(rename = "ends_with")]
    EndsWith,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "includes")]
    Includes,
    #[serde(rename = "in")]
    In,
}

impl ConditionOperator {
    /// Operators valid against string operands.
    pub fn valid_for_string(self) -> bool {
        matches!(
            self,
            ConditionOperator::Eq
                | ConditionOperator::Ne
                | ConditionOperator::Contains
                | ConditionOperator::StartsWith
                | ConditionOperator::EndsWith
                | ConditionOperator::In
        )
    }

    /// Operators valid against numeric operands.
    pub fn valid_for_number(self) -> bool {
        matches!(
            self,
            ConditionOperator::Eq
                | ConditionOperator::Ne
                | ConditionOperator::Gt
                | ConditionOperator::Ge
                | ConditionOperator::Lt
                | ConditionOperator::Le
                | ConditionOperator::In
        )
    }

    /// Operators valid against boolean operands (`==` only per the model).
    pub fn valid_for_bool(self) -> bool {
        matches!(self, ConditionOperator::Eq | ConditionOperator::Ne)
    }

    /// Operators valid against array operands.
    pub fn valid_for_array(self) -> bool {
        matches!(
            self,
            ConditionOperator::Contains | ConditionOperator::Includes | ConditionOperator::In
        )
    }

    /// Whether a literal of the given JSON type is compatible with this
    /// operator. `Null` is accepted everywhere equality is.
    pub fn compatible_with(self, literal: &Value) -> bool {
        match literal {
            Value::String(_) => self.valid_for_string(),
            Value::Number(_) => self.valid_for_number(),
            Value::Bool(_) => self.valid_for_bool(),
            Value::Array(_) => self.valid_for_array() || self.valid_for_string(),
            Value::Null => matches!(self, ConditionOperator::Eq | ConditionOperator::Ne),
            Value::Object(_) => matches!(self, ConditionOperator::Eq | ConditionOperator::Ne),
        }
    }

    /// The wire spelling of the operator (same string serde uses).
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionOperator::Eq => "==",
            ConditionOperator::Ne => "!=",
            ConditionOperator::Contains => "contains",
            ConditionOperator::StartsWith => "starts_with",
            ConditionOperator::EndsWith => "ends_with",
            ConditionOperator::Gt => ">",
            ConditionOperator::Ge => ">=",
            ConditionOperator::Lt => "<",
            ConditionOperator::Le => "<=",
            ConditionOperator::Includes => "includes",
            ConditionOperator::In => "in",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
