//! Compile-time file access.
//!
//! Relative paths resolve against the root working directory, not the
//! current import's. Handles alias like collections do; `close` takes the
//! underlying file out from under every alias.

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::rc::Rc;

use super::{Evaluator, Line};
use crate::error::TranspileError;
use crate::token::{FileHandle, Token, TokenKind};

impl Evaluator {
    pub(super) fn i_file(&mut self, line: &Line) -> Result<(), TranspileError> {
        let op = self.req(line, 1)?.clone();
        match op.lexeme().unwrap_or_default() {
            "open" => {
                let handle = self.open_file(line)?;
                self.write_var(
                    &self.req(line, 2)?.clone(),
                    Token::new(TokenKind::TextFile(handle)),
                );
            }
            "openbin" => {
                let handle = self.open_file(line)?;
                self.write_var(
                    &self.req(line, 2)?.clone(),
                    Token::new(TokenKind::BinFile(handle)),
                );
            }
            "close" => {
                let site = self.req(line, 2)?.clone();
                let file = self.resolve_var(&site);
                match &file.kind {
                    TokenKind::TextFile(h) | TokenKind::BinFile(h) => {
                        h.borrow_mut().take();
                    }
                    other => {
                        return Err(
                            self.error(format!("Expected file, got {}", other.tag_name()), &site)
                        )
                    }
                }
            }
            "read" => {
                let out = self.req(line, 2)?.clone();
                let site = self.req(line, 3)?.clone();
                let file = self.resolve_var(&site);
                let TokenKind::TextFile(handle) = &file.kind else {
                    return Err(self.error(
                        format!("Expected type 'text_file', got type '{}'", file.kind.tag_name()),
                        &site,
                    ));
                };
                let mut text = String::new();
                {
                    let mut guard = handle.borrow_mut();
                    let reader = guard
                        .as_mut()
                        .ok_or_else(|| self.error("File is closed", &site))?;
                    reader
                        .read_to_string(&mut text)
                        .map_err(|e| self.error(format!("Failed to read file: {}", e), &site))?;
                }
                self.write_var(&out, Token::string_auto(&text));
            }
            "readbytes" => {
                let out = self.req(line, 2)?.clone();
                let site = self.req(line, 3)?.clone();
                let file = self.resolve_var(&site);
                let TokenKind::BinFile(handle) = &file.kind else {
                    return Err(self.error(
                        format!("Expected type 'bin_file', got type '{}'", file.kind.tag_name()),
                        &site,
                    ));
                };
                let count_site = self.req(line, 4)?.clone();
                let count_tok = self.resolve_var(&count_site);
                let TokenKind::Number(count) = count_tok.kind else {
                    return Err(self.error(
                        format!("Expected type 'number', got type '{}'", count_tok.kind.tag_name()),
                        &count_site,
                    ));
                };
                if !(1.0..=32.0).contains(&count) {
                    return Err(
                        self.error("Byte count should be between 1 and 32", &count_site)
                    );
                }
                let endian_tok = if line.has(5) {
                    self.resolve_var(&self.opt(line, 5))
                } else {
                    Token::new(TokenKind::Str("\"big\"".to_string()))
                };
                let endian_site = self.opt(line, 5);
                let Some(endianness) = endian_tok.string_content() else {
                    return Err(self.error(
                        format!("Expected type 'string', got type '{}'", endian_tok.kind.tag_name()),
                        &endian_site,
                    ));
                };
                if endianness != "big" && endianness != "little" {
                    return Err(self.error(
                        "Invalid endianness, should be 'big' or 'little'",
                        &endian_site,
                    ));
                }
                let mut buffer = vec![0u8; count as usize];
                let mut filled = 0;
                {
                    let mut guard = handle.borrow_mut();
                    let reader = guard
                        .as_mut()
                        .ok_or_else(|| self.error("File is closed", &site))?;
                    loop {
                        let n = reader
                            .read(&mut buffer[filled..])
                            .map_err(|e| self.error(format!("Failed to read file: {}", e), &site))?;
                        if n == 0 || filled + n == buffer.len() {
                            filled += n;
                            break;
                        }
                        filled += n;
                    }
                }
                let bytes = &buffer[..filled];
                let value = match endianness {
                    "big" => bytes.iter().fold(0.0, |acc, &b| acc * 256.0 + b as f64),
                    _ => bytes.iter().rev().fold(0.0, |acc, &b| acc * 256.0 + b as f64),
                };
                self.write_var(&out, Token::number(value));
            }
            other => {
                return Err(self.error(format!("Unknown file operation \"{}\"", other), &op))
            }
        }
        Ok(())
    }

    fn open_file(&self, line: &Line) -> Result<FileHandle, TranspileError> {
        let site = self.req(line, 3)?.clone();
        let mut path = PathBuf::from(self.resolve_string(&site));
        if path.is_relative() {
            path = self.global_cwd.join(path);
        }
        let file = File::open(&path)
            .map_err(|_| self.error(format!("File {} not found", path.display()), &site))?;
        Ok(Rc::new(RefCell::new(Some(BufReader::new(file)))))
    }
}
