//! Textual method signatures.
//!
//! ```text
//! add(a: int, b: int = 10) -> int
//! ```
//!
//! Each parameter is `name`, `name: type` or `name: type = default`, where
//! `default` is a JSON literal (`None`, `True` and `False` are accepted as
//! well). A parameter without a type is kept as untyped so that
//! registration can report which one is missing.

use crate::error::CoreError;
use crate::types::TypeDescriptor;
use serde_json::Value;

/// A parameter as written in a signature.
#[derive(Debug, Clone, PartialEq)]
pub struct SigParam {
    pub name: String,
    pub ty: Option<TypeDescriptor>,
    pub default: Option<Value>,
}

/// A parsed signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub name: String,
    pub params: Vec<SigParam>,
    pub returns: Option<TypeDescriptor>,
}

impl Signature {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        let open = s.find('(').ok_or_else(|| invalid(s, "expected '('"))?;
        let close = matching_paren(s, open).ok_or_else(|| invalid(s, "unbalanced parentheses"))?;

        let name = s[..open].trim();
        if !is_ident(name) {
            return Err(invalid(s, format!("invalid method name '{}'", name)));
        }

        let mut params = Vec::new();
        let inner = &s[open + 1..close];
        if !inner.trim().is_empty() {
            for part in split_top_level(inner, ',') {
                params.push(parse_param(s, part)?);
            }
        }

        let rest = s[close + 1..].trim();
        let returns = if rest.is_empty() {
            None
        } else if let Some(ty) = rest.strip_prefix("->") {
            Some(TypeDescriptor::parse(ty)?)
        } else {
            return Err(invalid(s, format!("unexpected '{}' after parameters", rest)));
        };

        Ok(Self {
            name: name.to_string(),
            params,
            returns,
        })
    }
}

fn parse_param(sig: &str, part: &str) -> Result<SigParam, CoreError> {
    let (decl, default) = match split_top_level(part, '=').as_slice() {
        [decl] => (*decl, None),
        [decl, default] => (*decl, Some(parse_default(sig, default.trim())?)),
        _ => return Err(invalid(sig, format!("malformed parameter '{}'", part.trim()))),
    };

    let (name, ty) = match decl.split_once(':') {
        Some((name, ty)) => (name.trim(), Some(TypeDescriptor::parse(ty)?)),
        None => (decl.trim(), None),
    };
    if !is_ident(name) {
        return Err(invalid(sig, format!("invalid parameter name '{}'", name)));
    }

    Ok(SigParam {
        name: name.to_string(),
        ty,
        default,
    })
}

fn parse_default(sig: &str, text: &str) -> Result<Value, CoreError> {
    match text {
        "None" => return Ok(Value::Null),
        "True" => return Ok(Value::Bool(true)),
        "False" => return Ok(Value::Bool(false)),
        _ => {}
    }
    serde_json::from_str(text).map_err(|e| invalid(sig, format!("bad default '{}': {}", text, e)))
}

/// Splits on `sep` outside brackets and string literals.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s[open..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn invalid(sig: &str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidType {
        expr: sig.to_string(),
        reason: reason.into(),
    }
}
