//! Template expression resolver for workflow references.
//!
//! Templates are literal text interleaved with `{{...}}` spans. Each span
//! holds one reference into one of three namespaces:
//!
//! - `input.<name>` -- a declared required input
//! - `<step_id>.<path>` -- the output of an earlier step
//! - `loop.item[.<path>]` / `loop.index` -- the current loop binding
//!
//! Paths support dot segments, literal bracket string keys
//! (`item['field with spaces']`), and literal bracket indices (`item[0]`).
//! Dynamic (variable) indices are rejected at parse time; resolution is
//! total and returns a typed error naming the reference, never a panic.

use std::collections::HashMap;

use serde_json::Value;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from template parsing and resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    /// The reference parsed but its path does not exist in the scope.
    #[error("unresolved reference '{reference}'")]
    UnresolvedReference { reference: String },

    /// `input.<name>` names an input absent from the scope.
    #[error("input '{name}' is not declared")]
    UndeclaredInput { name: String },

    /// The step id in the reference has no recorded output.
    #[error("unknown step '{step_id}' in reference '{reference}'")]
    UnknownStep { step_id: String, reference: String },

    /// `loop.item` / `loop.index` used with no loop binding in scope.
    #[error("loop reference '{reference}' used outside a loop body")]
    NoLoopBinding { reference: String },

    /// A bracket index holds a variable; only literal indices are valid.
    #[error("dynamic index in reference '{reference}'; only literal indices are supported")]
    DynamicIndex { reference: String },

    /// The reference text does not match the grammar.
    #[error("malformed reference '{reference}': {detail}")]
    Malformed { reference: String, detail: String },
}

// ---------------------------------------------------------------------------
// Reference grammar
// ---------------------------------------------------------------------------

/// One segment of a reference path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

/// A parsed reference into one of the three namespaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Input { name: String },
    Step { step_id: String, path: Vec<PathSeg> },
    LoopItem { path: Vec<PathSeg> },
    LoopIndex,
}

/// A reference together with its raw span text (for error attribution).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRef {
    pub raw: String,
    pub reference: Reference,
}

/// Parse the inner text of one `{{...}}` span.
pub fn parse_reference(raw: &str) -> Result<Reference, ExpressionError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ExpressionError::Malformed {
            reference: raw.to_string(),
            detail: "empty reference".to_string(),
        });
    }

    let mut cursor = Cursor::new(text, raw);
    let head = cursor.identifier()?;

    match head.as_str() {
        "input" => {
            cursor.expect_dot()?;
            let name = cursor.identifier()?;
            if !cursor.at_end() {
                return Err(ExpressionError::Malformed {
                    reference: raw.to_string(),
                    detail: "input references take no path".to_string(),
                });
            }
            Ok(Reference::Input { name })
        }
        "loop" => {
            cursor.expect_dot()?;
            let field = cursor.identifier()?;
            match field.as_str() {
                "index" => {
                    if !cursor.at_end() {
                        return Err(ExpressionError::Malformed {
                            reference: raw.to_string(),
                            detail: "loop.index takes no path".to_string(),
                        });
                    }
                    Ok(Reference::LoopIndex)
                }
                "item" => {
                    let path = cursor.path()?;
                    Ok(Reference::LoopItem { path })
                }
                other => Err(ExpressionError::Malformed {
                    reference: raw.to_string(),
                    detail: format!("unknown loop field '{other}'"),
                }),
            }
        }
        _ => {
            let path = cursor.path()?;
            Ok(Reference::Step {
                step_id: head,
                path,
            })
        }
    }
}

/// Character cursor over a reference body.
struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    raw: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str, raw: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            raw,
        }
    }

    fn at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn malformed(&self, detail: impl Into<String>) -> ExpressionError {
        ExpressionError::Malformed {
            reference: self.raw.to_string(),
            detail: detail.into(),
        }
    }

    fn expect_dot(&mut self) -> Result<(), ExpressionError> {
        match self.chars.next() {
            Some('.') => Ok(()),
            _ => Err(self.malformed("expected '.'")),
        }
    }

    fn identifier(&mut self) -> Result<String, ExpressionError> {
        let mut ident = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                ident.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if ident.is_empty() {
            return Err(self.malformed("expected identifier"));
        }
        Ok(ident)
    }

    /// Remaining path: `.ident`, `['key']`, `["key"]`, `[0]` segments.
    fn path(&mut self) -> Result<Vec<PathSeg>, ExpressionError> {
        let mut segments = Vec::new();
        loop {
            match self.chars.peek() {
                None => break,
                Some('.') => {
                    self.chars.next();
                    segments.push(PathSeg::Key(self.identifier()?));
                }
                Some('[') => {
                    self.chars.next();
                    segments.push(self.bracket_segment()?);
                }
                Some(c) => {
                    let c = *c;
                    return Err(self.malformed(format!("unexpected character '{c}'")));
                }
            }
        }
        Ok(segments)
    }

    fn bracket_segment(&mut self) -> Result<PathSeg, ExpressionError> {
        match self.chars.peek() {
            Some(&quote) if quote == '\'' || quote == '"' => {
                self.chars.next();
                let mut key = String::new();
                loop {
                    match self.chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => key.push(c),
                        None => return Err(self.malformed("unterminated string key")),
                    }
                }
                match self.chars.next() {
                    Some(']') => Ok(PathSeg::Key(key)),
                    _ => Err(self.malformed("expected ']' after string key")),
                }
            }
            Some(c) if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&c) = self.chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                match self.chars.next() {
                    Some(']') => {
                        let index = digits.parse::<usize>().map_err(|e| {
                            self.malformed(format!("invalid index '{digits}': {e}"))
                        })?;
                        Ok(PathSeg::Index(index))
                    }
                    _ => Err(self.malformed("expected ']' after index")),
                }
            }
            // An identifier here is a variable index, which the grammar
            // explicitly rejects.
            Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                Err(ExpressionError::DynamicIndex {
                    reference: self.raw.to_string(),
                })
            }
            _ => Err(self.malformed("expected string key or literal index")),
        }
    }
}

// ---------------------------------------------------------------------------
// Template scanning
// ---------------------------------------------------------------------------

/// A `{{...}}` span within a template: byte range plus inner text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub inner: String,
}

/// Find all `{{...}}` spans in a template. An unterminated `{{` is treated
/// as literal text, keeping resolution total over arbitrary strings.
pub fn find_spans(template: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut search_from = 0;
    while let Some(open_rel) = template[search_from..].find("{{") {
        let open = search_from + open_rel;
        match template[open + 2..].find("}}") {
            Some(close_rel) => {
                let close = open + 2 + close_rel;
                spans.push(Span {
                    start: open,
                    end: close + 2,
                    inner: template[open + 2..close].to_string(),
                });
                search_from = close + 2;
            }
            None => break,
        }
    }
    spans
}

/// Parse every span in a template. Returns the first parse error, if any.
pub fn parse_template(template: &str) -> Result<Vec<ParsedRef>, ExpressionError> {
    find_spans(template)
        .into_iter()
        .map(|span| {
            parse_reference(&span.inner).map(|reference| ParsedRef {
                raw: span.inner.trim().to_string(),
                reference,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Current loop binding: the item under iteration and its index.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopBinding {
    pub item: Value,
    pub index: usize,
}

/// The run-time value store references resolve against: declared inputs,
/// step outputs keyed by id, and the current loop binding.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    inputs: HashMap<String, Value>,
    step_outputs: HashMap<String, Value>,
    loop_binding: Option<LoopBinding>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inputs(inputs: HashMap<String, Value>) -> Self {
        Self {
            inputs,
            step_outputs: HashMap::new(),
            loop_binding: None,
        }
    }

    pub fn set_input(&mut self, name: impl AsRef<str>, value: Value) {
        self.inputs.insert(name.as_ref().to_string(), value);
    }

    pub fn set_step_output(&mut self, step_id: impl AsRef<str>, value: Value) {
        self.step_outputs.insert(step_id.as_ref().to_string(), value);
    }

    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs.get(step_id)
    }

    pub fn step_outputs(&self) -> &HashMap<String, Value> {
        &self.step_outputs
    }

    /// Derive a scope with a loop binding for one body iteration. Inputs
    /// and step outputs are shared by clone; the binding shadows any outer
    /// one.
    pub fn child_with_loop(&self, item: Value, index: usize) -> Self {
        let mut child = self.clone();
        child.loop_binding = Some(LoopBinding { item, index });
        child
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve a template against a scope.
///
/// A template with no spans returns the literal unchanged. A template that
/// is exactly one span returns the referenced value with its JSON type
/// intact; otherwise each span is stringified into the surrounding text.
pub fn resolve(template: &str, scope: &Scope) -> Result<Value, ExpressionError> {
    let spans = find_spans(template);
    if spans.is_empty() {
        return Ok(Value::String(template.to_string()));
    }

    // Whole-template single reference keeps its type.
    if spans.len() == 1 && spans[0].start == 0 && spans[0].end == template.len() {
        let reference = parse_reference(&spans[0].inner)?;
        return lookup(&reference, spans[0].inner.trim(), scope);
    }

    let mut out = String::new();
    let mut cursor = 0;
    for span in &spans {
        out.push_str(&template[cursor..span.start]);
        let reference = parse_reference(&span.inner)?;
        let value = lookup(&reference, span.inner.trim(), scope)?;
        out.push_str(&stringify(&value));
        cursor = span.end;
    }
    out.push_str(&template[cursor..]);
    Ok(Value::String(out))
}

/// Render a resolved value for string interpolation: strings verbatim,
/// everything else as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn lookup(reference: &Reference, raw: &str, scope: &Scope) -> Result<Value, ExpressionError> {
    match reference {
        Reference::Input { name } => scope
            .inputs
            .get(name)
            .cloned()
            .ok_or_else(|| ExpressionError::UndeclaredInput { name: name.clone() }),
        Reference::Step { step_id, path } => {
            let root = scope.step_outputs.get(step_id).ok_or_else(|| {
                ExpressionError::UnknownStep {
                    step_id: step_id.clone(),
                    reference: raw.to_string(),
                }
            })?;
            navigate(root, path).ok_or_else(|| ExpressionError::UnresolvedReference {
                reference: raw.to_string(),
            })
        }
        Reference::LoopItem { path } => {
            let binding = scope.loop_binding.as_ref().ok_or_else(|| {
                ExpressionError::NoLoopBinding {
                    reference: raw.to_string(),
                }
            })?;
            navigate(&binding.item, path).ok_or_else(|| ExpressionError::UnresolvedReference {
                reference: raw.to_string(),
            })
        }
        Reference::LoopIndex => {
            let binding = scope.loop_binding.as_ref().ok_or_else(|| {
                ExpressionError::NoLoopBinding {
                    reference: raw.to_string(),
                }
            })?;
            Ok(Value::from(binding.index))
        }
    }
}

fn navigate(root: &Value, path: &[PathSeg]) -> Option<Value> {
    let mut current = root;
    for seg in path {
        current = match seg {
            PathSeg::Key(key) => current.get(key.as_str())?,
            PathSeg::Index(i) => current.get(*i)?,
        };
    }
    Some(current.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
