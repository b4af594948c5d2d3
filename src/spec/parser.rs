// src/spec/parser.rs
//! Spec string parser
//!
//! Grammar, whitespace separated where ambiguous:
//!
//! ```text
//! spec  := node ( '^' node )*
//! node  := [name] ( '@' versions | '+' variant | '~' variant | key '=' value )*
//! ```
//!
//! The first node may be anonymous (`+petsc~mpi`, `@rliv-1.0`); this is how
//! recipe conditions are written. Nodes after `^` must be named.

use crate::error::{Error, Result};
use crate::variant::{VariantMap, VariantValue, is_valid_name};
use crate::version::VersionConstraint;

/// One node of a parsed spec string
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecNode {
    pub name: Option<String>,
    pub versions: VersionConstraint,
    pub variants: VariantMap,
}

impl SpecNode {
    fn is_blank(&self) -> bool {
        self.name.is_none() && self.versions.is_any() && self.variants.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Name(&'a str),
    Versions(&'a str),
    Enable(&'a str),
    Disable(&'a str),
    Assign(&'a str, &'a str),
    Caret,
}

fn is_sigil(b: u8) -> bool {
    matches!(b, b'@' | b'+' | b'~' | b'^')
}

/// End of the word starting at `start`
fn scan(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < bytes.len() && !bytes[end].is_ascii_whitespace() && !is_sigil(bytes[end]) {
        end += 1;
    }
    end
}

fn tokenize(input: &str) -> Result<Vec<Token<'_>>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if b == b'^' {
            tokens.push(Token::Caret);
            i += 1;
            continue;
        }

        if matches!(b, b'@' | b'+' | b'~') {
            let end = scan(bytes, i + 1);
            let text = &input[i + 1..end];
            if text.is_empty() {
                return Err(Error::ParseError(format!(
                    "Expected text after '{}' in '{}'",
                    b as char, input
                )));
            }
            tokens.push(match b {
                b'@' => Token::Versions(text),
                b'+' => Token::Enable(text),
                _ => Token::Disable(text),
            });
            i = end;
            continue;
        }

        let end = scan(bytes, i);
        let word = &input[i..end];
        match word.split_once('=') {
            Some((key, value)) => tokens.push(Token::Assign(key, value)),
            None => tokens.push(Token::Name(word)),
        }
        i = end;
    }

    Ok(tokens)
}

/// Parse a spec string into its nodes; the result is never empty
pub fn parse_nodes(input: &str) -> Result<Vec<SpecNode>> {
    let mut nodes = vec![SpecNode::default()];
    let mut expect_name = false;

    for token in tokenize(input)? {
        if expect_name && !matches!(token, Token::Name(_)) {
            return Err(Error::ParseError(format!(
                "'^' must be followed by a package name in '{}'",
                input
            )));
        }

        // Always at least one node
        let Some(node) = nodes.last_mut() else {
            break;
        };

        match token {
            Token::Caret => {
                nodes.push(SpecNode::default());
                expect_name = true;
            }
            Token::Name(name) => {
                if !node.is_blank() {
                    return Err(Error::ParseError(format!(
                        "Unexpected package name '{}' in '{}'",
                        name, input
                    )));
                }
                if !is_valid_name(name) {
                    return Err(Error::ParseError(format!("Invalid package name '{}'", name)));
                }
                node.name = Some(name.to_string());
                expect_name = false;
            }
            Token::Versions(text) => {
                if !node.versions.is_any() {
                    return Err(Error::ParseError(format!(
                        "More than one version constraint on one node in '{}'",
                        input
                    )));
                }
                node.versions = VersionConstraint::parse(text)?;
            }
            Token::Enable(name) => node.variants.set_once(name, VariantValue::Bool(true))?,
            Token::Disable(name) => node.variants.set_once(name, VariantValue::Bool(false))?,
            Token::Assign(key, value) => {
                if value.is_empty() {
                    return Err(Error::ParseError(format!("Missing value for '{}'", key)));
                }
                node.variants.set_once(key, VariantValue::from_text(value))?;
            }
        }
    }

    if expect_name {
        return Err(Error::ParseError(format!(
            "Trailing '^' in '{}'",
            input
        )));
    }

    Ok(nodes)
}
