//! Macro capture and expansion.
//!
//! A macro body re-runs in a child evaluator whose scope stamp is unique per
//! invocation (`m_<name>_<n>_`), so identifiers minted inside the body never
//! collide across expansions. Every argument is implicitly in/out: writable
//! caller tokens are written back after the body runs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use super::{Evaluator, Line};
use crate::error::TranspileError;
use crate::token::{Macro, Token, TokenKind};

impl Evaluator {
    /// `defmac NAME ARGS… <body> end`
    pub(super) fn i_defmac(&mut self, line: &Line) -> Result<(), TranspileError> {
        let body = self
            .read_till("end")
            .ok_or_else(|| self.error("'end' expected, but not found", line.head()))?;
        let name_tok = self.req(line, 1)?;
        let TokenKind::Identifier(name) = &name_tok.kind else {
            return Err(self.error("Invalid name for macro", name_tok));
        };
        let mut params = Vec::new();
        for arg in line.args_from(2) {
            if !matches!(arg.kind, TokenKind::Identifier(_)) {
                return Err(self.error("Invalid name for macro argument", arg));
            }
            params.push(arg.clone());
        }
        self.macros.borrow_mut().insert(
            name.clone(),
            Rc::new(Macro {
                name: name.clone(),
                body,
                params,
                cwd: self.cwd.clone(),
            }),
        );
        Ok(())
    }

    /// `mac NAME ARGS…`
    pub(super) fn i_mac(&mut self, line: &Line) -> Result<(), TranspileError> {
        let name_tok = self.req(line, 1)?.clone();
        let name = name_tok.lexeme().unwrap_or_default().to_string();
        let Some(mac) = self.macros.borrow().get(&name).cloned() else {
            return Err(self.error(format!("Unknown macro '{}'", name), &name_tok));
        };
        let count = *self.macro_run_counts.borrow().get(&name).unwrap_or(&0);
        debug!(macro_name = name, run = count, "expanding macro");

        let mut child = self.child(Some(line.head().clone()), mac.body.clone());
        child.scope_str = format!("m_{}_{}_", name, count);
        child.owners = self.trace_chain();
        child.cwd = mac.cwd.clone();
        child.vars = Rc::new(RefCell::new(HashMap::new()));
        for (index, param) in mac.params.iter().enumerate() {
            let arg = self.opt(line, index + 2);
            child.write_var(param, self.resolve_var(&arg));
        }
        child.macros = Rc::new(RefCell::new(self.macros.borrow().clone()));

        self.macro_run_counts.borrow_mut().insert(name, count + 1);
        child.execute()?;
        self.output.append(&mut child.output);

        for (index, param) in mac.params.iter().enumerate() {
            if line.has(index + 2) {
                let value = child.resolve_var(param);
                self.write_var(&line.tokens[index + 2], value);
            }
        }
        Ok(())
    }

    /// `getmac VAR NAME`: reify a defined macro as a value.
    pub(super) fn i_getmac(&mut self, line: &Line) -> Result<(), TranspileError> {
        let source = self.req(line, 2)?.clone();
        let name = source.lexeme().unwrap_or_default();
        let Some(mac) = self.macros.borrow().get(name).cloned() else {
            return Err(self.error(format!("Unknown macro '{}'", name), &source));
        };
        self.write_var(self.req(line, 1)?, Token::new(TokenKind::Macro(mac)));
        Ok(())
    }

    /// `setmac NAME VAR`: install a macro value under a name.
    pub(super) fn i_setmac(&mut self, line: &Line) -> Result<(), TranspileError> {
        let value = self.resolve_var(self.req(line, 2)?);
        let TokenKind::Macro(mac) = &value.kind else {
            return Err(self.error(
                format!(
                    "Variable '{}' isn't of type 'macro'",
                    self.req(line, 2)?.lexeme().unwrap_or_default()
                ),
                self.req(line, 2)?,
            ));
        };
        let name_tok = self.req(line, 1)?;
        let TokenKind::Identifier(name) = &name_tok.kind else {
            return Err(self.error("Invalid name for macro", name_tok));
        };
        self.macros.borrow_mut().insert(name.clone(), Rc::clone(mac));
        Ok(())
    }
}
