//! Compile-time control flow: `if`/`elif`/`else`, `while`, `for`,
//! `discard`.
//!
//! Each construct reads its own body from the line stream up to the
//! matching `end`, nesting across the block-opening keywords. Loop bodies
//! run in a fresh child per pass so per-pass macro expansions keep getting
//! distinct scope stamps.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::math::token_truthy;
use super::{Evaluator, Line};
use crate::error::TranspileError;
use crate::token::{Token, TokenKind};

impl Evaluator {
    pub(super) fn i_if(&mut self, line: &Line) -> Result<(), TranspileError> {
        let sections = self
            .read_sections("end", &["elif", "else"])
            .ok_or_else(|| self.error("'end' expected, but not found", line.head()))?;
        for (header, section) in sections {
            let run = header.head().lexeme() == Some("else") || {
                let op = self.req(&header, 1)?.clone();
                let a = self.resolve_var(self.req(&header, 2)?);
                let b = self.resolve_var(&self.opt(&header, 3));
                token_truthy(&self.eval_condition(&op, &a, &b)?)
            };
            if run {
                let mut child = self.child(self.spawn.clone(), section);
                child.execute()?;
                self.output.append(&mut child.output);
                break;
            }
        }
        Ok(())
    }

    pub(super) fn i_while(&mut self, line: &Line) -> Result<(), TranspileError> {
        let body = self
            .read_till("end")
            .ok_or_else(|| self.error("'end' expected, but not found", line.head()))?;
        loop {
            let op = self.req(line, 1)?.clone();
            let a = self.resolve_var(self.req(line, 2)?);
            let b = self.resolve_var(&self.opt(line, 3));
            if !token_truthy(&self.eval_condition(&op, &a, &b)?) {
                break;
            }
            self.run_block(body.clone())?;
        }
        Ok(())
    }

    pub(super) fn i_for(&mut self, line: &Line) -> Result<(), TranspileError> {
        let body = self
            .read_till("end")
            .ok_or_else(|| self.error("'end' expected, but not found", line.head()))?;
        let iterator = self.req(line, 1)?.clone();
        match iterator.lexeme().unwrap_or_default() {
            "range" => {
                let (start, stop, step) = if line.has(5) {
                    let step_site = self.req(line, 5)?.clone();
                    let step = self.coerce_num(&self.resolve_var(&step_site)) as i64;
                    if step == 0 {
                        return Err(
                            self.error("'for range' step value must not be zero", &step_site)
                        );
                    }
                    (
                        self.coerce_num(&self.resolve_var(self.req(line, 3)?)) as i64,
                        self.coerce_num(&self.resolve_var(self.req(line, 4)?)) as i64,
                        step,
                    )
                } else if line.has(4) {
                    (
                        self.coerce_num(&self.resolve_var(self.req(line, 3)?)) as i64,
                        self.coerce_num(&self.resolve_var(self.req(line, 4)?)) as i64,
                        1,
                    )
                } else {
                    (
                        0,
                        self.coerce_num(&self.resolve_var(self.req(line, 3)?)) as i64,
                        1,
                    )
                };
                let var = self.req(line, 2)?.clone();
                let mut i = start;
                while (step > 0 && i < stop) || (step < 0 && i > stop) {
                    self.write_var(&var, Token::number(i as f64));
                    self.run_block(body.clone())?;
                    i += step;
                }
            }
            "list" => {
                let site = self.req(line, 3)?.clone();
                let source = self.resolve_var(&site);
                let TokenKind::List(handle) = &source.kind else {
                    return Err(self.error(
                        format!("Expected type 'list', got '{}'", source.kind.tag_name()),
                        &site,
                    ));
                };
                let var = self.req(line, 2)?.clone();
                let items = handle.borrow().clone();
                for item in items {
                    self.write_var(&var, item);
                    self.run_block(body.clone())?;
                }
            }
            "enumerate" => {
                let site = self.req(line, 4)?.clone();
                let source = self.resolve_var(&site);
                let TokenKind::List(handle) = &source.kind else {
                    return Err(self.error(
                        format!("Expected type 'list', got '{}'", source.kind.tag_name()),
                        &site,
                    ));
                };
                let index_var = self.req(line, 2)?.clone();
                let elem_var = self.req(line, 3)?.clone();
                let items = handle.borrow().clone();
                for (i, item) in items.into_iter().enumerate() {
                    self.write_var(&index_var, Token::number(i as f64));
                    self.write_var(&elem_var, item);
                    self.run_block(body.clone())?;
                }
            }
            "table" => {
                let site = self.req(line, 4)?.clone();
                let source = self.resolve_var(&site);
                let TokenKind::Table(handle) = &source.kind else {
                    return Err(self.error(
                        format!("Expected type 'table', got '{}'", source.kind.tag_name()),
                        &site,
                    ));
                };
                let key_var = self.req(line, 2)?.clone();
                let value_var = self.req(line, 3)?.clone();
                let entries: Vec<_> = handle
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (key, value) in entries {
                    self.write_var(&key_var, key.to_token());
                    self.write_var(&value_var, value);
                    self.run_block(body.clone())?;
                }
            }
            other => {
                return Err(self.error(format!("Unknown iterator '{}'", other), &iterator))
            }
        }
        Ok(())
    }

    /// `discard ARGS… <body> end`: run the body against copied maps with no
    /// packer attached, then re-export only the named arguments.
    pub(super) fn i_discard(&mut self, line: &Line) -> Result<(), TranspileError> {
        let body = self
            .read_till("end")
            .ok_or_else(|| self.error("'end' expected, but not found", line.head()))?;
        let mut child = self.child(self.spawn.clone(), body);
        child.macros = Rc::new(RefCell::new(self.macros.borrow().clone()));
        child.functions = Rc::new(RefCell::new(self.functions.borrow().clone()));
        child.vars = Rc::new(RefCell::new(self.vars.borrow().clone()));
        child.global_vars = Rc::new(RefCell::new(self.global_vars.borrow().clone()));
        child.macro_run_counts = Rc::new(RefCell::new(HashMap::new()));
        child.schem = None;
        child.execute()?;
        for arg in line.args_from(1) {
            if !matches!(
                arg.kind,
                TokenKind::Identifier(_) | TokenKind::GlobalIdentifier(_)
            ) {
                return Err(self.error(
                    format!(
                        "Expected type 'identifier' or 'global_identifier' but got type '{}'",
                        arg.kind.tag_name()
                    ),
                    arg,
                ));
            }
            let value = child.resolve_var(arg);
            self.write_var(arg, value);
        }
        Ok(())
    }

    fn run_block(&mut self, body: Vec<Token>) -> Result<(), TranspileError> {
        let mut child = self.child(self.spawn.clone(), body);
        child.execute()?;
        self.output.append(&mut child.output);
        Ok(())
    }
}
