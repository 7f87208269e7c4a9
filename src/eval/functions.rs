//! Function capture, call plumbing and the shared return trampoline.
//!
//! A function body is emitted once per processor, after that processor's
//! `end`. Each call site stores `@counter + 1` into the function's return
//! slot and jumps to the body; the body jumps back through the slot. In and
//! out arguments are plumbed with plain `set` instructions around the jump.

use std::path::PathBuf;
use std::rc::Rc;

use tracing::debug;

use super::{Evaluator, Line};
use crate::error::TranspileError;
use crate::token::{Scope, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    InOut,
}

/// A function definition: at most one per name.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub body: Vec<Token>,
    pub params: Vec<(Token, Direction)>,
    pub cwd: PathBuf,
}

impl Evaluator {
    /// `deffun NAME [>|<|<>]ARGS… <body> end`
    pub(super) fn i_deffun(&mut self, line: &Line) -> Result<(), TranspileError> {
        let body = self
            .read_till("end")
            .ok_or_else(|| self.error("'end' expected, but not found", line.head()))?;
        let name_tok = self.req(line, 1)?;
        let TokenKind::Identifier(name) = &name_tok.kind else {
            return Err(self.error("Invalid name for function", name_tok));
        };
        if self.functions.borrow().contains_key(name) {
            return Err(self.error(format!("Function '{}' is already defined", name), name_tok));
        }
        let scope = format!("f_{}_", name);
        let mut params = Vec::new();
        for arg in line.args_from(2) {
            let TokenKind::Identifier(raw) = &arg.kind else {
                return Err(self.error("Invalid name for function argument", arg));
            };
            let (stripped, direction) = if let Some(rest) = raw.strip_prefix("<>") {
                (rest, Direction::InOut)
            } else if let Some(rest) = raw.strip_prefix('>') {
                (rest, Direction::In)
            } else if let Some(rest) = raw.strip_prefix('<') {
                (rest, Direction::Out)
            } else {
                (raw.as_str(), Direction::In)
            };
            let mut param = arg.clone();
            param.kind = TokenKind::Identifier(stripped.to_string());
            param.scope = Scope::Set(Rc::from(scope.as_str()));
            params.push((param, direction));
        }
        self.functions.borrow_mut().insert(
            name.clone(),
            Rc::new(Function {
                name: name.clone(),
                body,
                params,
                cwd: self.cwd.clone(),
            }),
        );
        Ok(())
    }

    /// `fun NAME ARGS…`: emit the call sequence; the body itself is
    /// deferred to processor close.
    pub(super) fn i_fun(&mut self, line: &Line) -> Result<(), TranspileError> {
        let name_tok = self.req(line, 1)?.clone();
        let name = name_tok.lexeme().unwrap_or_default().to_string();
        let Some(func) = self.functions.borrow().get(&name).cloned() else {
            return Err(self.error(format!("Unknown function '{}'", name), &name_tok));
        };
        if !self.called_functions.borrow().contains(&name) {
            self.called_functions.borrow_mut().push(name.clone());
        }

        for (index, (param, direction)) in func.params.iter().enumerate() {
            let arg = self.req(line, index + 2)?;
            if matches!(direction, Direction::In | Direction::InOut)
                && arg.lexeme() != Some("_")
            {
                let arg = arg.with_scope(&self.scope_str);
                self.output.extend([
                    Token::instruction("set"),
                    param.clone(),
                    arg,
                    Token::line_break(),
                ]);
            }
        }
        self.output.extend([
            Token::instruction("op"),
            Token::sub_instruction("add"),
            Token::identifier(&format!("{}_return", name)).with_scope("function_"),
            Token::content("@counter"),
            Token::number(1.0),
            Token::line_break(),
        ]);
        self.output.extend([
            Token::instruction("jump"),
            Token::identifier(&name).with_scope("function_"),
            Token::sub_instruction("always"),
            Token::line_break(),
        ]);
        for (index, (param, direction)) in func.params.iter().enumerate() {
            let arg = self.req(line, index + 2)?;
            if matches!(direction, Direction::Out | Direction::InOut)
                && matches!(
                    arg.kind,
                    TokenKind::Identifier(_) | TokenKind::GlobalIdentifier(_)
                )
                && arg.lexeme() != Some("_")
            {
                let arg = arg.with_scope(&self.scope_str);
                self.output.extend([
                    Token::instruction("set"),
                    arg,
                    param.clone(),
                    Token::line_break(),
                ]);
            }
        }
        Ok(())
    }

    /// At processor close, append one body block per called function after
    /// an `end` terminator. Bodies may call further functions; the worklist
    /// is re-read so late registrations are still emitted.
    pub(super) fn expand_functions(&mut self) -> Result<(), TranspileError> {
        if self.called_functions.borrow().is_empty() {
            return Ok(());
        }
        self.output
            .extend([Token::instruction("end"), Token::line_break()]);
        let mut index = 0;
        loop {
            let name = {
                let called = self.called_functions.borrow();
                match called.get(index) {
                    Some(name) => name.clone(),
                    None => break,
                }
            };
            let Some(func) = self.functions.borrow().get(&name).cloned() else {
                index += 1;
                continue;
            };
            debug!(function = name, "emitting function body");
            self.output.extend([
                Token::new(TokenKind::Label(format!("{}:", name))).with_scope("function_"),
                Token::line_break(),
            ]);
            let mut body_eval = self.child(self.spawn.clone(), func.body.clone());
            body_eval.scope_str = format!("f_{}_", name);
            body_eval.execute()?;
            self.output.append(&mut body_eval.output);
            self.output.extend([
                Token::instruction("set"),
                Token::content("@counter"),
                Token::identifier(&format!("{}_return", name)).with_scope("function_"),
                Token::line_break(),
            ]);
            index += 1;
        }
        Ok(())
    }
}
