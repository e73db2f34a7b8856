//! Token-scanning analyzer.
//!
//! Recognised shapes, where `api` is the module API identifier:
//!
//! | Shape                         | Meaning                          |
//! |-------------------------------|----------------------------------|
//! | `api('name')`                 | dependency on `name`             |
//! | `api.define('name', ...)`     | local sub-module `name`          |
//! | `api.exportDefine(...)`       | deferred export producer         |
//! | `api.export`                  | direct export usage              |
//!
//! The argument list of `define` and `exportDefine` is skipped: whatever the
//! nested factory requests belongs to the nested module, not to this body.

use anyhow::{anyhow, bail, Result};
use tracing::trace;

use crate::{SourceAnalysis, SourceAnalyzer};

/// Method name that marks a deferred export.
pub const EXPORT_DEFINE_METHOD: &str = "exportDefine";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Punct(char),
    Number,
}

/// Default [`SourceAnalyzer`].
#[derive(Debug, Clone)]
pub struct ScanAnalyzer {
    default_api_name: String,
}

impl Default for ScanAnalyzer {
    fn default() -> Self {
        Self::new("module")
    }
}

impl ScanAnalyzer {
    pub fn new(default_api_name: impl Into<String>) -> Self {
        Self {
            default_api_name: default_api_name.into(),
        }
    }

    pub fn default_api_name(&self) -> &str {
        &self.default_api_name
    }
}

impl SourceAnalyzer for ScanAnalyzer {
    fn analyze(&self, source: &str, api_name: Option<&str>) -> Result<SourceAnalysis> {
        let tokens = tokenize(source)?;
        let api = match api_name {
            Some(name) => name.to_string(),
            // Minified factories may rename the API parameter, so take it from
            // the first single-parameter function.
            None => detect_api_name(&tokens).unwrap_or_else(|| self.default_api_name.clone()),
        };
        trace!(api = %api, tokens = tokens.len(), "scanning source");
        scan(&tokens, &api)
    }
}

fn scan(tokens: &[Token], api: &str) -> Result<SourceAnalysis> {
    let mut analysis = SourceAnalysis::default();
    let mut i = 0;

    while i < tokens.len() {
        let is_api = matches!(&tokens[i], Token::Ident(id) if id == api);
        let is_member = i > 0 && tokens[i - 1] == Token::Punct('.');
        if !is_api || is_member {
            i += 1;
            continue;
        }

        match (tokens.get(i + 1), tokens.get(i + 2), tokens.get(i + 3)) {
            (Some(Token::Punct('(')), Some(Token::Str(name)), Some(Token::Punct(')'))) => {
                if !analysis.dependency_names.contains(name) {
                    analysis.dependency_names.push(name.clone());
                }
                i += 4;
            }
            (Some(Token::Punct('.')), Some(Token::Ident(method)), next) => {
                let open_paren = matches!(next, Some(Token::Punct('(')));
                match method.as_str() {
                    "define" if open_paren => {
                        if let Some(Token::Str(name)) = tokens.get(i + 4) {
                            if !analysis.local_definition_names.contains(name) {
                                analysis.local_definition_names.push(name.clone());
                            }
                        }
                        i = skip_group(tokens, i + 3)?;
                    }
                    EXPORT_DEFINE_METHOD if open_paren => {
                        analysis.exports_marker = Some(EXPORT_DEFINE_METHOD.to_string());
                        i = skip_group(tokens, i + 3)?;
                    }
                    "export" => {
                        analysis.uses_export = true;
                        i += 3;
                    }
                    _ => i += 3,
                }
            }
            _ => i += 1,
        }
    }

    let locals = analysis.local_definition_names.clone();
    analysis.dependency_names.retain(|dep| !locals.contains(dep));
    Ok(analysis.finish())
}

/// Returns the index just past the parenthesised group opening at `open`.
fn skip_group(tokens: &[Token], open: usize) -> Result<usize> {
    let mut depth = 0usize;
    for (offset, token) in tokens[open..].iter().enumerate() {
        match token {
            Token::Punct('(') => depth += 1,
            Token::Punct(')') => {
                depth -= 1;
                if depth == 0 {
                    return Ok(open + offset + 1);
                }
            }
            _ => {}
        }
    }
    Err(anyhow!("unbalanced parentheses after token {}", open))
}

fn detect_api_name(tokens: &[Token]) -> Option<String> {
    let start = tokens
        .iter()
        .position(|t| matches!(t, Token::Ident(id) if id == "function"))?;
    let mut i = start + 1;
    if matches!(tokens.get(i), Some(Token::Ident(_))) {
        i += 1;
    }
    match (tokens.get(i), tokens.get(i + 1), tokens.get(i + 2)) {
        (Some(Token::Punct('(')), Some(Token::Ident(param)), Some(Token::Punct(')'))) => {
            Some(param.clone())
        }
        _ => None,
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
        } else if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            let start = i;
            i += 2;
            loop {
                if i + 1 >= len {
                    bail!("unterminated block comment starting at offset {}", start);
                }
                if chars[i] == '*' && chars[i + 1] == '/' {
                    i += 2;
                    break;
                }
                i += 1;
            }
        } else if c == '\'' || c == '"' || c == '`' {
            let (value, next) = read_string(&chars, i)?;
            tokens.push(Token::Str(value));
            i = next;
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < len && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() {
            while i < len && (chars[i].is_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Number);
        } else {
            tokens.push(Token::Punct(c));
            i += 1;
        }
    }

    Ok(tokens)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize)> {
    let quote = chars[start];
    let mut value = String::new();
    let mut i = start + 1;

    loop {
        match chars.get(i) {
            None => bail!("unterminated string literal starting at offset {}", start),
            Some('\\') => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("unterminated string literal starting at offset {}", start))?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                i += 2;
            }
            Some(ch) if *ch == quote => return Ok((value, i + 1)),
            Some('\n') if quote != '`' => {
                bail!("unterminated string literal starting at offset {}", start)
            }
            Some(ch) => {
                value.push(*ch);
                i += 1;
            }
        }
    }
}
