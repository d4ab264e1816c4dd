//! The textual configuration artifact handed to the backend: ordered
//! `name = literal` lines interleaved with comments.

use crate::literal::{parse_literal, Literal, LiteralError};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Blank,
    Comment(String),
    Assignment {
        name: String,
        raw: String,
        /// Source text, kept until the value is replaced so base-file
        /// formatting and trailing comments survive a round trip.
        original: Option<String>,
    },
    /// A non-blank line that is not `name = value`, e.g. the continuation of
    /// a multi-line list. It renders verbatim but cannot be compared.
    Other(String),
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("line {line}: not an assignment: {text:?}")]
    NotAssignment { line: usize, text: String },
    #[error("line {line}: `{name}`: {source}")]
    Literal {
        line: usize,
        name: String,
        #[source]
        source: LiteralError,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigArtifact {
    lines: Vec<Line>,
}

impl ConfigArtifact {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(parse_line).collect(),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config artifact {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Blank => {}
                Line::Comment(text) | Line::Other(text) => out.push_str(text),
                Line::Assignment {
                    original: Some(text),
                    ..
                } => out.push_str(text),
                Line::Assignment { name, raw, .. } => {
                    out.push_str(name);
                    out.push_str(" = ");
                    out.push_str(raw);
                }
            }
            out.push('\n');
        }
        out
    }

    pub fn push_section(&mut self, title: &str) {
        if !self.lines.is_empty() {
            self.lines.push(Line::Blank);
        }
        self.lines
            .push(Line::Comment(format!("# ===== {} ===== #", title)));
    }

    /// Set `name` to `raw`. An existing assignment is replaced in place and
    /// any later duplicates are dropped; otherwise the line is appended.
    pub fn set(&mut self, name: &str, raw: impl Into<String>) {
        let raw = raw.into();
        let mut seen = false;
        self.lines.retain_mut(|line| match line {
            Line::Assignment {
                name: n,
                raw: r,
                original,
            } if n == name => {
                if seen {
                    return false;
                }
                seen = true;
                *r = raw.clone();
                *original = None;
                true
            }
            _ => true,
        });
        if !seen {
            self.lines.push(Line::Assignment {
                name: name.to_string(),
                raw,
                original: None,
            });
        }
    }

    pub fn set_literal(&mut self, name: &str, value: &Literal) {
        self.set(name, value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|line| match line {
            Line::Assignment { name: n, raw, .. } if n == name => Some(raw.as_str()),
            _ => None,
        })
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().filter_map(|line| match line {
            Line::Assignment { name, raw, .. } => Some((name.as_str(), raw.as_str())),
            _ => None,
        })
    }

    /// Every assignment parsed into a typed value; later assignments win.
    /// Fails on the first line that is not a plain literal assignment.
    pub fn typed_variables(&self) -> Result<BTreeMap<String, Literal>, ArtifactError> {
        let mut out = BTreeMap::new();
        for (idx, line) in self.lines.iter().enumerate() {
            match line {
                Line::Blank | Line::Comment(_) => {}
                Line::Other(text) => {
                    return Err(ArtifactError::NotAssignment {
                        line: idx + 1,
                        text: text.clone(),
                    })
                }
                Line::Assignment { name, raw, .. } => {
                    let value = parse_literal(raw).map_err(|source| ArtifactError::Literal {
                        line: idx + 1,
                        name: name.clone(),
                        source,
                    })?;
                    out.insert(name.clone(), value);
                }
            }
        }
        Ok(out)
    }
}

fn parse_line(text: &str) -> Line {
    let code = strip_comment(text).trim();
    if code.is_empty() {
        return if text.trim().is_empty() {
            Line::Blank
        } else {
            Line::Comment(text.to_string())
        };
    }
    match code.split_once('=') {
        Some((name, raw)) if is_identifier(name.trim()) && !raw.starts_with('=') => {
            Line::Assignment {
                name: name.trim().to_string(),
                raw: raw.trim().to_string(),
                original: Some(text.to_string()),
            }
        }
        _ => Line::Other(text.to_string()),
    }
}

/// Cut a trailing `#` comment, ignoring `#` inside quoted strings.
fn strip_comment(text: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, c) in text.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '#' => return &text[..idx],
                '\'' | '"' => quote = Some(c),
                _ => {}
            },
        }
    }
    text
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "\
# ===== base ===== #
out_name = 'HD189.vul'   # file name

atom_list = ['H', 'O', 'C']
use_photo = True
count_max = 1e4
";

    #[test]
    fn parses_and_renders_verbatim() {
        let artifact = ConfigArtifact::parse(BASE);
        assert_eq!(artifact.render(), BASE);
        assert_eq!(artifact.get("out_name"), Some("'HD189.vul'"));
        assert_eq!(artifact.variables().count(), 4);
    }

    #[test]
    fn hash_inside_string_is_not_a_comment() {
        let artifact = ConfigArtifact::parse("label = 'run #3' # note\n");
        assert_eq!(artifact.get("label"), Some("'run #3'"));
    }

    #[test]
    fn set_replaces_in_place_and_drops_duplicates() {
        let mut artifact = ConfigArtifact::parse("a = 1\nb = 2\na = 3\n");
        artifact.set("a", "9");
        artifact.set("c", "'new'");
        assert_eq!(artifact.render(), "a = 9\nb = 2\nc = 'new'\n");
    }

    #[test]
    fn typed_variables_last_assignment_wins() {
        let artifact = ConfigArtifact::parse("x = 1\nx = 2.0\n");
        let vars = artifact.typed_variables().expect("typed");
        assert_eq!(vars["x"], Literal::Float(2.0));
    }

    #[test]
    fn typed_variables_reject_expressions_and_fragments() {
        let artifact = ConfigArtifact::parse("x = np.zeros(3)\n");
        assert!(matches!(
            artifact.typed_variables(),
            Err(ArtifactError::Literal { line: 1, .. })
        ));
        let artifact = ConfigArtifact::parse("x = [1,\n 2]\n");
        assert!(artifact.typed_variables().is_err());
        let artifact = ConfigArtifact::parse("a == b\n");
        assert!(matches!(
            artifact.typed_variables(),
            Err(ArtifactError::NotAssignment { .. })
        ));
    }
}
