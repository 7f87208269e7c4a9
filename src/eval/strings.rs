//! String operations: `strop`, `strlabel`, `strvar`.
//!
//! Regex operations use the `regex` crate's dialect; there are no
//! backreferences or lookaround. Indexing is by character, negative indices
//! count from the end, and substring ranges clamp instead of failing.

use std::cell::RefCell;
use std::rc::Rc;

use regex::Regex;

use super::{Evaluator, Line};
use crate::error::TranspileError;
use crate::token::{Token, TokenKind};

impl Evaluator {
    /// `strop OP OUT IN …`
    pub(super) fn i_strop(&mut self, line: &Line) -> Result<(), TranspileError> {
        let op = self.req(line, 1)?.clone();
        let op_name = op.lexeme().unwrap_or_default().to_string();
        let out_tok = self.req(line, 2)?.clone();
        let str_in = self.resolve_string(self.req(line, 3)?);

        let result: Option<Token> = match op_name.as_str() {
            "cat" => {
                let mut joined = String::new();
                for token in line.args_from(3) {
                    joined.push_str(&self.resolve_string(token));
                }
                Some(Token::string_auto(&joined))
            }
            "num" => match str_in.trim().parse::<f64>() {
                Ok(value) => Some(Token::number(value)),
                Err(_) => {
                    return Err(self.error("Unable to convert to number", self.req(line, 3)?))
                }
            },
            "charat" => {
                let index_tok = self.resolve_var(self.req(line, 4)?);
                let TokenKind::Number(raw) = index_tok.kind else {
                    return Err(self.error("Expected numeric value", self.req(line, 4)?));
                };
                let chars: Vec<char> = str_in.chars().collect();
                let mut index = raw as i64;
                if index < 0 {
                    index += chars.len() as i64;
                }
                match usize::try_from(index).ok().and_then(|i| chars.get(i)) {
                    Some(c) => Some(Token::string_auto(&c.to_string())),
                    None => {
                        return Err(
                            self.error("Index out of bounds for string", self.req(line, 4)?)
                        )
                    }
                }
            }
            "substr" => {
                let chars: Vec<char> = str_in.chars().collect();
                let start_tok = self.resolve_var(self.req(line, 4)?);
                let TokenKind::Number(start) = start_tok.kind else {
                    return Err(self.error("Expected numeric value", self.req(line, 4)?));
                };
                let end = if line.has(5) {
                    let end_tok = self.resolve_var(self.req(line, 5)?);
                    let TokenKind::Number(end) = end_tok.kind else {
                        return Err(self.error("Expected numeric value", self.req(line, 5)?));
                    };
                    slice_index(end as i64, chars.len())
                } else {
                    chars.len()
                };
                let start = slice_index(start as i64, chars.len());
                let piece: String = if start < end {
                    chars[start..end].iter().collect()
                } else {
                    String::new()
                };
                Some(Token::string_auto(&piece))
            }
            "split" => {
                let separator = self.resolve_string(self.req(line, 4)?);
                if separator.is_empty() {
                    return Err(self.error("Empty separator", self.req(line, 4)?));
                }
                let items: Vec<Token> = str_in
                    .split(separator.as_str())
                    .map(Token::string_auto)
                    .collect();
                Some(Token::list(Rc::new(RefCell::new(items))))
            }
            "rematch" => {
                let regex = self.compile_regex(line, 4)?;
                match regex.find(&str_in) {
                    Some(found) => Some(Token::string_auto(found.as_str())),
                    None => {
                        self.write_var(&out_tok, Token::null());
                        None
                    }
                }
            }
            "refind" => {
                let haystack = self.resolve_string(self.req(line, 4)?);
                let regex = self.compile_regex(line, 5)?;
                let end_tok = self.req(line, 3)?.clone();
                match regex.find(&haystack) {
                    Some(found) => {
                        let start = haystack[..found.start()].chars().count() as f64;
                        let end = haystack[..found.end()].chars().count() as f64;
                        self.write_var(&out_tok, Token::number(start));
                        self.write_var(&end_tok, Token::number(end));
                    }
                    None => {
                        self.write_var(&out_tok, Token::null());
                        self.write_var(&end_tok, Token::null());
                    }
                }
                None
            }
            "regroups" => {
                let regex = self.compile_regex(line, 4)?;
                match regex.captures(&str_in) {
                    Some(caps) => {
                        let groups: Vec<Token> = (1..caps.len())
                            .map(|i| match caps.get(i) {
                                Some(group) => Token::string_auto(group.as_str()),
                                None => Token::null(),
                            })
                            .collect();
                        Some(Token::list(Rc::new(RefCell::new(groups))))
                    }
                    None => {
                        self.write_var(&out_tok, Token::null());
                        None
                    }
                }
            }
            "rematchall" => {
                let regex = self.compile_regex(line, 4)?;
                let group_count = regex.captures_len() - 1;
                let items: Vec<Token> = regex
                    .captures_iter(&str_in)
                    .map(|caps| match group_count {
                        0 => Token::string_auto(&caps[0]),
                        1 => Token::string_auto(caps.get(1).map_or("", |g| g.as_str())),
                        _ => {
                            let groups: Vec<Token> = (1..=group_count)
                                .map(|i| {
                                    Token::string_auto(caps.get(i).map_or("", |g| g.as_str()))
                                })
                                .collect();
                            Token::list(Rc::new(RefCell::new(groups)))
                        }
                    })
                    .collect();
                Some(Token::list(Rc::new(RefCell::new(items))))
            }
            _ => {
                return Err(self.error(format!("Unknown string operation \"{}\"", op_name), &op))
            }
        };

        if let Some(value) = result {
            self.write_var(&out_tok, value);
        }
        Ok(())
    }

    fn compile_regex(&self, line: &Line, index: usize) -> Result<Regex, TranspileError> {
        let token = self.req(line, index)?.clone();
        let pattern = self.resolve_string(&token);
        Regex::new(&pattern)
            .map_err(|e| self.error(format!("Invalid regex pattern: {}", e), &token))
    }

    /// `strlabel STRING`: emit a label built from a string, spaces folded
    /// to underscores, stamped with the current scope.
    pub(super) fn i_strlabel(&mut self, line: &Line) -> Result<(), TranspileError> {
        let source = self.req(line, 1)?.clone();
        let value = self.resolve_var(&source);
        let Some(content) = value.string_content() else {
            return Err(self.error(
                format!("Expected type 'string', got type '{}'", value.kind.tag_name()),
                &source,
            ));
        };
        let label = Token::new(TokenKind::Label(format!("{}:", content.replace(' ', "_"))))
            .with_scope(&self.scope_str)
            .at_token(&source);
        self.output.push(label);
        self.output.push(line.last().clone());
        Ok(())
    }

    /// `strvar CONTEXT VAR STRING`: build a variable-name token from a
    /// string, in local, global or unscoped context.
    pub(super) fn i_strvar(&mut self, line: &Line) -> Result<(), TranspileError> {
        let context = self.req(line, 1)?.clone();
        let out_var = self.req(line, 2)?.clone();
        let value = self.resolve_var(self.req(line, 3)?);
        let Some(content) = value.string_content() else {
            return Err(self.error(
                format!("Expected type 'string', got type '{}'", value.kind.tag_name()),
                self.req(line, 3)?,
            ));
        };
        let name = content.replace(' ', "_");
        let kind = match context.lexeme().unwrap_or_default() {
            "local" => TokenKind::Identifier(name),
            "global" => TokenKind::GlobalIdentifier(name),
            "unscoped" => TokenKind::UnscopedIdentifier(name),
            other => {
                return Err(
                    self.error(format!("Unknown variable context '{}'", other), &context)
                )
            }
        };
        self.write_var(&out_var, Token::new(kind));
        Ok(())
    }
}

fn slice_index(index: i64, len: usize) -> usize {
    let len = len as i64;
    let clamped = if index < 0 {
        (index + len).max(0)
    } else {
        index.min(len)
    };
    clamped as usize
}
