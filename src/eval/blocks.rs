//! Schematic directives: `block` and `proc`.
//!
//! Both register entries with the packer and bind the generated link name.
//! A `proc` body runs in a child evaluator with a clean local world and
//! mlog emission enabled; its output text becomes the processor's program.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use super::{Evaluator, Line};
use crate::error::TranspileError;
use crate::schematic::{BlockEntry, ProcEntry};
use crate::token::{token_list_to_str, Token, TokenKind};

impl Evaluator {
    /// `block VAR @TYPE [x y [rot]]`
    pub(super) fn i_block(&mut self, line: &Line) -> Result<(), TranspileError> {
        let var_name = self.req(line, 1)?.clone();
        if !matches!(
            var_name.kind,
            TokenKind::Identifier(_) | TokenKind::GlobalIdentifier(_)
        ) {
            return Err(self.error("Invalid variable name", &var_name));
        }
        let block_type = self.resolve_var(self.req(line, 2)?);
        let TokenKind::Content(type_value) = &block_type.kind else {
            return Err(self.error("Expected block type", &block_type));
        };
        let pos = if line.has(4) {
            Some((
                self.numeric_arg(line, 3)? as i32,
                self.numeric_arg(line, 4)? as i32,
            ))
        } else {
            None
        };
        let rotation = if line.has(5) {
            self.numeric_arg(line, 5)? as i32 as u8
        } else {
            0
        };
        if let Some(schem) = &self.schem {
            let entry = BlockEntry {
                head: line.head().clone(),
                type_token: block_type.clone(),
                type_name: type_value[1..].to_string(),
                pos,
                rotation,
                link_name: String::new(),
                trace: self.trace_chain(),
            };
            let name = schem.borrow_mut().add_block(entry);
            debug!(link = name, "registered block");
            self.write_var(&var_name, Token::block(&name));
        }
        Ok(())
    }

    /// `proc [VAR [@TYPE x y]]`
    pub(super) fn i_proc(&mut self, line: &Line) -> Result<(), TranspileError> {
        let body = self
            .read_till("end")
            .ok_or_else(|| self.error("'end' expected, but not found", line.head()))?;
        let mut child = self.child(self.spawn.clone(), body);
        child.scope_str = String::new();
        child.vars = Rc::new(RefCell::new(HashMap::new()));
        child.macro_run_counts = Rc::new(RefCell::new(HashMap::new()));
        child.called_functions = Rc::new(RefCell::new(Vec::new()));
        child.is_processor = true;
        child.execute()?;

        let proc_type = if line.has(4) {
            Some(self.resolve_var(self.req(line, 2)?))
        } else if line.has(2) {
            return Err(self.error(
                "Unable to define type of proc without defined position",
                self.req(line, 2)?,
            ));
        } else {
            None
        };
        let pos = if line.has(4) {
            Some((
                self.numeric_arg(line, 3)? as i32,
                self.numeric_arg(line, 4)? as i32,
            ))
        } else {
            None
        };
        if let Some(schem) = &self.schem {
            let code = token_list_to_str(&child.output);
            debug!(bytes = code.len(), "registered processor");
            let name = schem.borrow_mut().add_proc(ProcEntry {
                code,
                pos,
                proc_type,
                head: line.head().clone(),
                trace: self.trace_chain(),
            });
            if line.has(1) {
                self.write_var(self.req(line, 1)?, Token::block(&name));
            }
        }
        Ok(())
    }

    fn numeric_arg(&self, line: &Line, index: usize) -> Result<f64, TranspileError> {
        let site = self.req(line, index)?;
        let resolved = self.resolve_var(site);
        match resolved.kind {
            TokenKind::Number(n) => Ok(n),
            _ => Err(self.error("Expected numeric value", site)),
        }
    }
}
