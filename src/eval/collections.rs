//! Collection operations: `list` and `table`.
//!
//! Lists and tables are handles; every binding of the same collection
//! aliases it, and mutations are visible through every alias. `copy` is the
//! only way to break the aliasing. Table keys must be primitive and tables
//! iterate in insertion order.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use super::{Evaluator, Line};
use crate::error::TranspileError;
use crate::token::{ListHandle, TableHandle, TableKey, Token, TokenKind};

impl Evaluator {
    pub(super) fn i_list(&mut self, line: &Line) -> Result<(), TranspileError> {
        let op = self.req(line, 1)?.clone();
        match op.lexeme().unwrap_or_default() {
            "from" => {
                let out = self.req(line, 2)?.clone();
                let items: Vec<Token> = line
                    .args_from(3)
                    .iter()
                    .map(|t| self.resolve_var(t))
                    .collect();
                self.write_var(&out, Token::list(Rc::new(RefCell::new(items))));
            }
            "copy" => {
                let out = self.req(line, 2)?.clone();
                let source = self.resolve_var(self.req(line, 3)?);
                let copied = match source.kind {
                    TokenKind::List(_) => source.deep_copy(),
                    _ => Token::list(Rc::new(RefCell::new(Vec::new()))),
                };
                self.write_var(&out, copied);
            }
            "set" => {
                let list_var = self.req(line, 2)?.clone();
                let handle = self.list_handle(&list_var);
                let value = self.resolve_var(self.req(line, 3)?);
                let index = self.list_index(line, 4, handle.borrow().len())?;
                handle.borrow_mut()[index] = value;
                self.write_var(&list_var, Token::list(handle));
            }
            "get" => {
                let out = self.req(line, 2)?.clone();
                let handle = self.list_handle(self.req(line, 3)?);
                let index = self.list_index(line, 4, handle.borrow().len())?;
                let value = handle.borrow()[index].clone();
                self.write_var(&out, value);
            }
            "append" => {
                let list_var = self.req(line, 2)?.clone();
                let handle = self.list_handle(&list_var);
                let value = self.resolve_var(self.req(line, 3)?);
                handle.borrow_mut().push(value);
                self.write_var(&list_var, Token::list(handle));
            }
            "insert" => {
                let list_var = self.req(line, 2)?.clone();
                let handle = self.list_handle(&list_var);
                let value = self.resolve_var(self.req(line, 3)?);
                let index_tok = self.resolve_var(self.req(line, 4)?);
                let TokenKind::Number(raw) = index_tok.kind else {
                    return Err(self.error(
                        format!("Expected type 'number', got type '{}'", index_tok.kind.tag_name()),
                        self.req(line, 4)?,
                    ));
                };
                let len = handle.borrow().len() as i64;
                let index = (raw as i64).clamp(-len, len);
                let index = if index < 0 { index + len } else { index } as usize;
                handle.borrow_mut().insert(index, value);
                self.write_var(&list_var, Token::list(handle));
            }
            "del" => {
                let list_var = self.req(line, 2)?.clone();
                let handle = self.list_handle(&list_var);
                let index = self.list_index(line, 3, handle.borrow().len())?;
                handle.borrow_mut().remove(index);
                self.write_var(&list_var, Token::list(handle));
            }
            "len" => {
                let out = self.req(line, 2)?.clone();
                let source = self.resolve_var(self.req(line, 3)?);
                let value = match &source.kind {
                    TokenKind::List(h) => Token::number(h.borrow().len() as f64),
                    _ => Token::null(),
                };
                self.write_var(&out, value);
            }
            "index" => {
                let out = self.req(line, 2)?.clone();
                let source = self.resolve_var(self.req(line, 3)?);
                let needle = self.resolve_var(self.req(line, 4)?);
                let value = match &source.kind {
                    TokenKind::List(h) => {
                        let found = h.borrow().iter().position(|e| e.same_value(&needle));
                        Token::number(found.map_or(-1.0, |i| i as f64))
                    }
                    _ => Token::null(),
                };
                self.write_var(&out, value);
            }
            "in" => {
                let out = self.req(line, 2)?.clone();
                let source = self.resolve_var(self.req(line, 3)?);
                let needle = self.resolve_var(self.req(line, 4)?);
                let value = match &source.kind {
                    TokenKind::List(h) => {
                        let hit = h.borrow().iter().any(|e| e.same_value(&needle));
                        Token::number(hit as u8 as f64)
                    }
                    _ => Token::null(),
                };
                self.write_var(&out, value);
            }
            other => {
                return Err(self.error(format!("Unknown list operation \"{}\"", other), &op))
            }
        }
        Ok(())
    }

    pub(super) fn i_table(&mut self, line: &Line) -> Result<(), TranspileError> {
        let op = self.req(line, 1)?.clone();
        match op.lexeme().unwrap_or_default() {
            "from" => {
                let out = self.req(line, 2)?.clone();
                let pairs = line.args_from(3);
                if pairs.len() % 2 != 0 {
                    return Err(self.error("Unfinished key value pair", line.last()));
                }
                let mut table = IndexMap::new();
                for chunk in pairs.chunks(2) {
                    let key = self.resolve_var(&chunk[0]);
                    let value = self.resolve_var(&chunk[1]);
                    let key = self.table_key(&key, &chunk[0])?;
                    table.insert(key, value);
                }
                self.write_var(&out, Token::table(Rc::new(RefCell::new(table))));
            }
            "copy" => {
                let out = self.req(line, 2)?.clone();
                let source = self.resolve_var(self.req(line, 3)?);
                let copied = match source.kind {
                    TokenKind::Table(_) => source.deep_copy(),
                    _ => Token::table(Rc::new(RefCell::new(IndexMap::new()))),
                };
                self.write_var(&out, copied);
            }
            "set" => {
                let table_var = self.req(line, 2)?.clone();
                let handle = self.table_handle(&table_var);
                let key = self.resolve_var(self.req(line, 3)?);
                let value = self.resolve_var(self.req(line, 4)?);
                let key = self.table_key(&key, self.req(line, 3)?)?;
                handle.borrow_mut().insert(key, value);
                self.write_var(&table_var, Token::table(handle));
            }
            "get" => {
                let out = self.req(line, 2)?.clone();
                let handle = self.table_handle(self.req(line, 3)?);
                let key_site = self.req(line, 4)?.clone();
                let key_tok = self.resolve_var(&key_site);
                let value = TableKey::from_token(&key_tok)
                    .and_then(|key| handle.borrow().get(&key).cloned())
                    .ok_or_else(|| {
                        self.error(format!("Key '{}' not found", key_tok), &key_site)
                    })?;
                self.write_var(&out, value);
            }
            "del" => {
                let table_var = self.req(line, 2)?.clone();
                let handle = self.table_handle(&table_var);
                let key_tok = self.resolve_var(self.req(line, 3)?);
                let removed = TableKey::from_token(&key_tok)
                    .and_then(|key| handle.borrow_mut().shift_remove(&key));
                if removed.is_none() {
                    return Err(self.error(
                        format!("Key '{}' not found", key_tok),
                        self.req(line, 3)?,
                    ));
                }
                self.write_var(&table_var, Token::table(handle));
            }
            "in" => {
                let out = self.req(line, 2)?.clone();
                let handle = self.table_handle(self.req(line, 3)?);
                let key_tok = self.resolve_var(self.req(line, 4)?);
                let hit = TableKey::from_token(&key_tok)
                    .map(|key| handle.borrow().contains_key(&key))
                    .unwrap_or(false);
                self.write_var(&out, Token::number(hit as u8 as f64));
            }
            "readjson" => {
                let out = self.req(line, 2)?.clone();
                let site = self.req(line, 3)?.clone();
                let source = self.resolve_var(&site);
                let Some(text) = source.string_content() else {
                    return Err(self.error(
                        format!("Expected type 'string', got type '{}'", source.kind.tag_name()),
                        &site,
                    ));
                };
                let parsed: serde_json::Value = serde_json::from_str(text)
                    .map_err(|e| self.error(format!("Invalid JSON: {}", e), &site))?;
                if !parsed.is_object() {
                    return Err(self.error("Expected JSON object", &site));
                }
                self.write_var(&out, json_to_token(&parsed));
            }
            "writejson" => {
                let out = self.req(line, 2)?.clone();
                let source = self.resolve_var(self.req(line, 3)?);
                if !matches!(source.kind, TokenKind::Table(_)) {
                    return Err(self.error(
                        format!("Expected type 'table', got type '{}'", source.kind.tag_name()),
                        self.req(line, 3)?,
                    ));
                }
                let value = self.token_to_json(&source, self.req(line, 3)?)?;
                self.write_var(&out, Token::string_auto(&value.to_string()));
            }
            other => {
                return Err(self.error(format!("Unknown table operation \"{}\"", other), &op))
            }
        }
        Ok(())
    }

    /// Resolve a token to a list handle; anything that is not a bound list
    /// variable produces a fresh empty list.
    fn list_handle(&self, token: &Token) -> ListHandle {
        if matches!(
            token.kind,
            TokenKind::Identifier(_) | TokenKind::GlobalIdentifier(_)
        ) {
            if let TokenKind::List(handle) = self.resolve_var(token).kind {
                return handle;
            }
        }
        Rc::new(RefCell::new(Vec::new()))
    }

    fn table_handle(&self, token: &Token) -> TableHandle {
        if matches!(
            token.kind,
            TokenKind::Identifier(_) | TokenKind::GlobalIdentifier(_)
        ) {
            if let TokenKind::Table(handle) = self.resolve_var(token).kind {
                return handle;
            }
        }
        Rc::new(RefCell::new(IndexMap::new()))
    }

    /// A numeric list index argument with negative-from-end semantics,
    /// bounds checked.
    fn list_index(
        &self,
        line: &Line,
        position: usize,
        len: usize,
    ) -> Result<usize, TranspileError> {
        let token = self.req(line, position)?;
        let resolved = self.resolve_var(token);
        let TokenKind::Number(raw) = resolved.kind else {
            return Err(self.error(
                format!("Expected type 'number', got type '{}'", resolved.kind.tag_name()),
                token,
            ));
        };
        let mut index = raw as i64;
        if index < 0 {
            index += len as i64;
        }
        if index < 0 || index >= len as i64 {
            return Err(self.error("Index out of range", token));
        }
        Ok(index as usize)
    }

    fn table_key(&self, key: &Token, site: &Token) -> Result<TableKey, TranspileError> {
        TableKey::from_token(key).ok_or_else(|| {
            self.error(
                format!("Unable to write type '{}' to table key", key.kind.tag_name()),
                site,
            )
        })
    }

    fn token_to_json(
        &self,
        token: &Token,
        site: &Token,
    ) -> Result<serde_json::Value, TranspileError> {
        use serde_json::Value;
        Ok(match &token.kind {
            TokenKind::Null => Value::Null,
            TokenKind::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n).map(Value::Number).ok_or_else(|| {
                        self.error("Unable to represent value as JSON", site)
                    })?
                }
            }
            TokenKind::Str(_) => Value::String(token.string_content().unwrap_or_default().to_string()),
            TokenKind::List(h) => {
                let items: Result<Vec<Value>, TranspileError> = h
                    .borrow()
                    .iter()
                    .map(|item| self.token_to_json(item, site))
                    .collect();
                Value::Array(items?)
            }
            TokenKind::Table(h) => {
                let mut object = serde_json::Map::new();
                for (key, value) in h.borrow().iter() {
                    object.insert(key.to_string(), self.token_to_json(value, site)?);
                }
                Value::Object(object)
            }
            TokenKind::Content(v)
            | TokenKind::Identifier(v)
            | TokenKind::GlobalIdentifier(v)
            | TokenKind::UnscopedIdentifier(v)
            | TokenKind::Block(v) => Value::String(v.clone()),
            TokenKind::Color(c) => Value::String(format!("%{}", c.to_hex())),
            _ => {
                return Err(self.error(
                    format!("Unable to write type '{}' to JSON", token.kind.tag_name()),
                    site,
                ))
            }
        })
    }
}

fn json_to_token(value: &serde_json::Value) -> Token {
    use serde_json::Value;
    match value {
        Value::Null => Token::null(),
        Value::Bool(b) => Token::number(*b as u8 as f64),
        Value::Number(n) => Token::number(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => Token::string_auto(s),
        Value::Array(items) => {
            let list: Vec<Token> = items.iter().map(json_to_token).collect();
            Token::list(Rc::new(RefCell::new(list)))
        }
        Value::Object(entries) => {
            let mut table = IndexMap::new();
            for (key, value) in entries {
                table.insert(TableKey::Str(key.clone()), json_to_token(value));
            }
            Token::table(Rc::new(RefCell::new(table)))
        }
    }
}
