//! Script minification

use super::source_map::SourceMap;
use crate::context::BuildContext;
use async_trait::async_trait;

/// Minifier collaborator
///
/// Takes the current text and in-flight map, returns the minified text and a
/// map rewritten to match it. Errors are diagnostic text for the file.
#[async_trait]
pub trait Minifier: Send + Sync {
    async fn minify(
        &self,
        text: &str,
        map: Option<SourceMap>,
        ctx: &BuildContext,
    ) -> Result<(String, Option<SourceMap>), String>;
}

/// Line-oriented minifier
///
/// Trims every line, drops blank lines, whole-line `//` comments and block
/// comments that start a line. `/*!` license comments are preserved. Lines
/// that begin inside a string or template literal are kept byte-for-byte.
/// Line structure is otherwise kept, so the map can be rewritten line-for-line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineMinifier;

impl LineMinifier {
    pub fn new() -> Self {
        Self
    }

    /// Minify `text`, remapping `map` to the kept lines
    pub fn minify_text(
        &self,
        text: &str,
        map: Option<SourceMap>,
    ) -> Result<(String, Option<SourceMap>), String> {
        let mut kept: Vec<&str> = Vec::new();
        let mut origins: Vec<usize> = Vec::new();
        let mut lexer = Lexer::default();

        for (index, raw) in text.lines().enumerate() {
            let mut line = match lexer.state {
                State::Str(_) | State::Template => {
                    lexer.scan(raw);
                    kept.push(raw);
                    origins.push(index);
                    continue;
                }
                State::Comment { kept: true } => raw,
                State::Comment { kept: false } => match raw.find("*/") {
                    Some(end) => {
                        lexer.state = State::Code;
                        &raw[end + 2..]
                    }
                    None => continue,
                },
                State::Code => raw,
            };
            line = line.trim_start();

            if lexer.state == State::Code && line.starts_with("/*") && !line.starts_with("/*!") {
                match line[2..].find("*/") {
                    Some(end) => line = line[end + 4..].trim_start(),
                    None => {
                        lexer.state = State::Comment { kept: false };
                        continue;
                    }
                }
            }

            if lexer.state == State::Code && (line.is_empty() || line.starts_with("//")) {
                continue;
            }

            lexer.scan(line);
            if !lexer.in_literal() {
                line = line.trim_end();
            }
            kept.push(line);
            origins.push(index);
        }

        match lexer.state {
            State::Comment { .. } => return Err("unterminated block comment".to_string()),
            State::Template => return Err("unterminated template literal".to_string()),
            State::Str(_) | State::Code => {}
        }

        let map = map.map(|mut map| {
            map.remap(&origins);
            map
        });
        Ok((kept.join("\n"), map))
    }
}

#[async_trait]
impl Minifier for LineMinifier {
    async fn minify(
        &self,
        text: &str,
        map: Option<SourceMap>,
        _ctx: &BuildContext,
    ) -> Result<(String, Option<SourceMap>), String> {
        self.minify_text(text, map)
    }
}

/// Lexical position at a line boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    /// Inside a block comment; `kept` when its lines stay in the output
    Comment { kept: bool },
    /// Inside a quoted string continued with a trailing backslash
    Str(char),
    /// Inside a template literal, outside any `${}`
    Template,
}

/// Tracks comments, strings and template literals across lines
///
/// Regular expression literals are not recognised.
#[derive(Debug)]
struct Lexer {
    state: State,
    /// Brace depth inside each open `${` substitution
    substitutions: Vec<usize>,
}

impl Default for Lexer {
    fn default() -> Self {
        Self {
            state: State::Code,
            substitutions: Vec::new(),
        }
    }
}

impl Lexer {
    fn in_literal(&self) -> bool {
        matches!(self.state, State::Str(_) | State::Template)
    }

    /// Advance over one line
    fn scan(&mut self, line: &str) {
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match self.state {
                State::Code => match c {
                    '/' if chars.peek() == Some(&'/') => break,
                    '/' if chars.peek() == Some(&'*') => {
                        chars.next();
                        self.state = State::Comment { kept: true };
                    }
                    '\'' | '"' => self.state = State::Str(c),
                    '`' => self.state = State::Template,
                    '{' => {
                        if let Some(depth) = self.substitutions.last_mut() {
                            *depth += 1;
                        }
                    }
                    '}' => match self.substitutions.last_mut() {
                        Some(0) => {
                            self.substitutions.pop();
                            self.state = State::Template;
                        }
                        Some(depth) => *depth -= 1,
                        None => {}
                    },
                    _ => {}
                },
                State::Comment { .. } => {
                    if c == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        self.state = State::Code;
                    }
                }
                State::Str(quote) => {
                    if c == '\\' {
                        // An escaped line break keeps the string open
                        if chars.next().is_none() {
                            return;
                        }
                    } else if c == quote {
                        self.state = State::Code;
                    }
                }
                State::Template => match c {
                    '\\' => {
                        chars.next();
                    }
                    '`' => self.state = State::Code,
                    '$' if chars.peek() == Some(&'{') => {
                        chars.next();
                        self.substitutions.push(0);
                        self.state = State::Code;
                    }
                    _ => {}
                },
            }
        }

        // Quoted strings end at an unescaped line break
        if let State::Str(_) = self.state {
            self.state = State::Code;
        }
    }
}
