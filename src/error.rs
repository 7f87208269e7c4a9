//! Fatal errors and warnings with owner tracebacks.
//!
//! Every failure path in the transpiler produces a `TranspileError` carrying
//! the offending token and the chain of spawn instructions (imports, macro
//! invocations, body readers) that led to it. Rendering and process exit
//! happen only at the CLI boundary; the library surface stays `Result`.

use thiserror::Error;

use crate::style::Style;
use crate::token::Token;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct TranspileError {
    pub message: String,
    /// The token the error points at.
    pub token: Option<Token>,
    /// Spawn instructions from outermost to innermost.
    pub trace: Vec<Token>,
}

impl TranspileError {
    pub fn new(message: impl Into<String>) -> TranspileError {
        TranspileError {
            message: message.into(),
            token: None,
            trace: Vec::new(),
        }
    }

    pub fn at(message: impl Into<String>, token: Token) -> TranspileError {
        TranspileError {
            message: message.into(),
            token: Some(token),
            trace: Vec::new(),
        }
    }

    pub fn with_trace(mut self, trace: Vec<Token>) -> TranspileError {
        self.trace = trace;
        self
    }

    /// Full diagnostic: message, owner chain, offending location.
    pub fn render_traceback(&self) -> String {
        render(&Style::bold_red("Error"), &self.message, &self.trace, self.token.as_ref())
    }
}

/// Warnings share the traceback format but do not abort.
pub fn print_warning(message: &str, token: &Token, trace: &[Token]) {
    eprintln!(
        "{}",
        render(&Style::yellow("Warning"), message, trace, Some(token))
    );
}

fn render(label: &str, message: &str, trace: &[Token], token: Option<&Token>) -> String {
    let mut out = format!("{}: {}\nTraceback (most recent call last):", label, message);
    for cause in trace.iter().chain(token) {
        out.push('\n');
        out.push_str(&location(cause));
    }
    out
}

fn location(token: &Token) -> String {
    match &token.file {
        Some(file) => format!("({},{}) in '{}'", token.line, token.column, file.display()),
        None => format!("({},{})", token.line, token.column),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::rc::Rc;

    #[test]
    fn traceback_lists_owners_then_site() {
        let file = Rc::new(PathBuf::from("main.sfm"));
        let owner = Token::instruction("import").at(3, 1, Some(file.clone()));
        let site = Token::identifier("x").at(7, 5, Some(file));
        let error = TranspileError::at("Unknown macro 'm'", site).with_trace(vec![owner]);
        let text = error.render_traceback();
        assert!(text.contains("Unknown macro 'm'"));
        assert!(text.contains("(3,1) in 'main.sfm'"));
        assert!(text.contains("(7,5) in 'main.sfm'"));
        let owner_pos = text.find("(3,1)").unwrap();
        let site_pos = text.find("(7,5)").unwrap();
        assert!(owner_pos < site_pos, "owners print before the site");
    }

    #[test]
    fn locations_without_files_omit_the_path() {
        let error = TranspileError::at("boom", Token::identifier("x").at(1, 2, None));
        assert!(error.render_traceback().contains("(1,2)\n") || error.render_traceback().ends_with("(1,2)"));
    }
}
