//! Placeholder Templates
//!
//! Text with `{key}` placeholders, used for shell commands, parameter
//! expressions and report labels. `{{` and `}}` produce literal braces so
//! that shell snippets like `awk '{{print $1}}'` survive rendering.

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Text(String),
    Placeholder(String),
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pieces: Vec<Piece>,
}

impl Template {
    /// Parses template text. Errors describe the first syntax problem.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut key = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        if c == '{' {
                            return Err(format!("nested '{{' in placeholder '{{{}'", key));
                        }
                        key.push(c);
                    }
                    if !closed {
                        return Err(format!("unterminated placeholder '{{{}'", key));
                    }
                    let key = key.trim();
                    if key.is_empty() {
                        return Err("empty placeholder '{}'".to_string());
                    }
                    if !literal.is_empty() {
                        pieces.push(Piece::Text(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Placeholder(key.to_string()));
                }
                '}' => return Err("unbalanced '}' (use '}}' for a literal brace)".to_string()),
                _ => literal.push(ch),
            }
        }

        if !literal.is_empty() {
            pieces.push(Piece::Text(literal));
        }
        Ok(Self { pieces })
    }

    /// Placeholder keys in order of appearance, duplicates included.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Placeholder(key) => Some(key.as_str()),
            Piece::Text(_) => None,
        })
    }

    /// Renders the template, asking `lookup` for each placeholder.
    ///
    /// Fails with a message naming the first key `lookup` cannot resolve.
    pub fn render<F>(&self, mut lookup: F) -> Result<String, String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Placeholder(key) => {
                    let value = lookup(key).ok_or_else(|| format!("unknown placeholder '{{{}}}'", key))?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

/// Splits a placeholder key into namespace and optional member.
///
/// `"input.fq"` → `("input", Some("fq"))`, `"output"` → `("output", None)`.
pub fn split_key(key: &str) -> (&str, Option<&str>) {
    match key.split_once('.') {
        Some((namespace, member)) => (namespace, Some(member)),
        None => (key, None),
    }
}
