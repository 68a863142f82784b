//! Extraction of prompt variants from free-form vision model output.
//!
//! Language models wrap JSON in markdown fences and sometimes pretty-print
//! string literals across several lines. [`repair_json_text`] undoes both
//! before the text reaches `serde_json`; anything still invalid after that is
//! rejected outright.

use serde::Serialize;
use serde_json::Value;

use crate::error::ParseError;

/// Output of the vision model, either raw completion text or an object the
/// client already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    RawText(String),
    Structured(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptVariant {
    pub index: u32,
    /// Untrusted model text; pass through `storage::sanitize_category` before
    /// using it in any key or path.
    pub category: String,
    pub prompt: String,
}

/// Non-empty, ordered list of variants as received from the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantList(Vec<PromptVariant>);

impl VariantList {
    pub fn new(variants: Vec<PromptVariant>) -> Result<Self, ParseError> {
        if variants.is_empty() {
            return Err(ParseError::SchemaViolation(
                "'variants' array is empty".into(),
            ));
        }
        Ok(Self(variants))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PromptVariant> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<PromptVariant> {
        self.0
    }
}

impl IntoIterator for VariantList {
    type Item = PromptVariant;
    type IntoIter = std::vec::IntoIter<PromptVariant>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

pub fn parse_optional(output: Option<ModelOutput>) -> Result<VariantList, ParseError> {
    match output {
        Some(output) => parse(output),
        None => Err(ParseError::EmptyResponse),
    }
}

pub fn parse(output: ModelOutput) -> Result<VariantList, ParseError> {
    let value = match output {
        ModelOutput::Structured(value) => value,
        ModelOutput::RawText(text) => decode_text(&text)?,
    };
    validate(&value)
}

/// Strips code fences, joins line breaks that follow an unescaped quote and
/// blanks out carriage returns.
pub fn repair_json_text(text: &str) -> String {
    let unfenced = strip_fences(text.trim());
    collapse_quoted_line_breaks(&unfenced).replace('\r', " ")
}

fn decode_text(text: &str) -> Result<Value, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::EmptyResponse);
    }
    let repaired = repair_json_text(text);
    serde_json::from_str(&repaired).map_err(|e| ParseError::MalformedOutput(e.to_string()))
}

fn strip_fences(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            let mut line = line;
            if let Some(rest) = line.strip_prefix("```") {
                line = rest
                    .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
                    .trim_start();
            }
            line.strip_suffix("```").unwrap_or(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_quoted_line_breaks(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        i += 1;

        let escaped = i >= 2 && chars[i - 2] == '\\';
        if c != '"' || escaped {
            continue;
        }

        let mut end = i;
        let mut saw_newline = false;
        while end < chars.len() && chars[end].is_whitespace() {
            saw_newline |= chars[end] == '\n';
            end += 1;
        }
        if saw_newline {
            out.push(' ');
            i = end;
        }
    }

    out
}

fn validate(value: &Value) -> Result<VariantList, ParseError> {
    let items = value
        .get("variants")
        .and_then(Value::as_array)
        .ok_or_else(|| ParseError::SchemaViolation("missing 'variants' array".into()))?;

    let mut variants = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let prompt = item
            .get("prompt")
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                ParseError::SchemaViolation(format!("variant {} is missing a prompt", idx + 1))
            })?;
        let index = item
            .get("variant")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(idx as u32 + 1);
        let category = item
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or_default();

        variants.push(PromptVariant {
            index,
            category: category.to_string(),
            prompt: prompt.to_string(),
        });
    }

    VariantList::new(variants)
}
