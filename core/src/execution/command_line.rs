//! Splitting a command string into a pipeline of argument vectors.
//!
//! Quoting follows POSIX shell rules closely enough for job scripts:
//! single quotes are literal, double quotes allow `\"`, `\\`, `\$` and
//! `` \` `` escapes, and a backslash outside quotes escapes the next
//! character. An unquoted `|` token separates pipeline stages. Nothing else
//! is interpreted: `>`, `&&`, `;`, `$VAR` and globs reach the program as
//! literal arguments.

use crate::error::{Error, Result};


/// One stage of a pipeline: program followed by its arguments.
pub type Argv = Vec<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// A lexed word, remembering whether any part of it was quoted so that a
/// quoted `"|"` is not mistaken for a pipe.
struct Word {
    text: String,
    quoted: bool,
}

/// Split `line` into pipeline stages.
///
/// An empty or whitespace-only line yields no stages. An empty stage
/// (`a | | b`, a leading or trailing `|`) or an unterminated quote is an
/// `InvalidCommand` error.
pub fn split_pipeline(line: &str) -> Result<Vec<Argv>> {
    let words = lex(line)?;
    if words.is_empty() {
        return Ok(Vec::new());
    }

    let mut stages = Vec::new();
    let mut current: Argv = Vec::new();
    for word in words {
        if !word.quoted && word.text == "|" {
            if current.is_empty() {
                return Err(invalid(line, "empty pipeline stage"));
            }
            stages.push(std::mem::take(&mut current));
        } else {
            current.push(word.text);
        }
    }
    if current.is_empty() {
        return Err(invalid(line, "empty pipeline stage"));
    }
    stages.push(current);
    Ok(stages)
}

fn lex(line: &str) -> Result<Vec<Word>> {
    let mut words = Vec::new();
    let mut text = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut quote = Quote::None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    text.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.peek() {
                    Some(&next) if matches!(next, '"' | '\\' | '$' | '`') => {
                        text.push(next);
                        chars.next();
                    }
                    Some('\n') => {
                        chars.next();
                    }
                    _ => text.push('\\'),
                },
                _ => text.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                    quoted = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                    quoted = true;
                }
                '\\' => {
                    in_word = true;
                    match chars.next() {
                        // Line continuation.
                        Some('\n') => {}
                        Some(next) => {
                            text.push(next);
                            quoted = true;
                        }
                        None => return Err(invalid(line, "trailing backslash")),
                    }
                }
                '|' if !in_word => {
                    words.push(Word {
                        text: "|".to_string(),
                        quoted: false,
                    });
                }
                '|' => {
                    words.push(Word {
                        text: std::mem::take(&mut text),
                        quoted,
                    });
                    words.push(Word {
                        text: "|".to_string(),
                        quoted: false,
                    });
                    in_word = false;
                    quoted = false;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(Word {
                            text: std::mem::take(&mut text),
                            quoted,
                        });
                        in_word = false;
                        quoted = false;
                    }
                }
                _ => {
                    text.push(c);
                    in_word = true;
                }
            },
        }
    }

    if quote != Quote::None {
        return Err(invalid(line, "unterminated quote"));
    }
    if in_word {
        words.push(Word { text, quoted });
    }
    Ok(words)
}

fn invalid(line: &str, reason: &str) -> Error {
    Error::InvalidCommand {
        command: line.to_string(),
        reason: reason.to_string(),
    }
}
