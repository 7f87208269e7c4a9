//! The compile-time evaluator.
//!
//! One recursive, scoped machine: it groups the token stream into
//! instruction lines, runs the builtin compile-time instructions, and passes
//! everything else through to mlog output after variable resolution. Child
//! evaluators share the variable, macro and function maps with their parent
//! by handle; `proc`, `mac` and `discard` swap in fresh or copied maps
//! exactly where isolation is required.

mod blocks;
mod collections;
mod control;
mod files;
mod functions;
mod macros;
mod math;
mod strings;

pub use functions::{Direction, Function};

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::TranspileError;
use crate::lexer::tokenize;
use crate::schematic::SchemBuilder;
use crate::token::{display_value, Macro, Token, TokenKind};

/// Instructions that open an `end`-terminated body and therefore nest.
pub const BLOCK_INSTRUCTIONS: &[&str] =
    &["defmac", "deffun", "proc", "if", "while", "for", "discard"];

/// One instruction line: its tokens, terminated by a line break.
#[derive(Debug, Clone)]
pub struct Line {
    pub tokens: Vec<Token>,
}

impl Line {
    pub fn head(&self) -> &Token {
        &self.tokens[0]
    }

    pub fn last(&self) -> &Token {
        self.tokens.last().unwrap()
    }

    /// Argument at `index`, if present and not the terminating break.
    pub fn get(&self, index: usize) -> Option<&Token> {
        self.tokens
            .get(index)
            .filter(|t| !matches!(t.kind, TokenKind::LineBreak))
    }

    pub fn has(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Arguments from `from` up to the terminating break.
    pub fn args_from(&self, from: usize) -> &[Token] {
        let end = self.tokens.len().saturating_sub(1);
        self.tokens.get(from..end).unwrap_or(&[])
    }
}

fn read_lines(code: Vec<Token>) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut current = Vec::new();
    for token in code {
        let is_break = matches!(token.kind, TokenKind::LineBreak);
        current.push(token);
        if is_break {
            lines.push(Line { tokens: current });
            current = Vec::new();
        }
    }
    lines
}

type SharedMap<V> = Rc<RefCell<HashMap<String, V>>>;

pub struct Evaluator {
    /// The instruction that spawned this evaluator, if any.
    spawn: Option<Token>,
    /// Spawn instructions of the surrounding evaluators, outermost first.
    owners: Vec<Token>,
    lines: Vec<Line>,
    pub output: Vec<Token>,
    pub cwd: PathBuf,
    pub global_cwd: PathBuf,
    scope_str: String,
    macros: SharedMap<Rc<Macro>>,
    macro_run_counts: SharedMap<u32>,
    functions: SharedMap<Rc<Function>>,
    called_functions: Rc<RefCell<Vec<String>>>,
    vars: SharedMap<Token>,
    global_vars: SharedMap<Token>,
    pub schem: Option<Rc<RefCell<SchemBuilder>>>,
    allow_mlog: bool,
    is_root: bool,
    is_processor: bool,
    pointer: usize,
}

impl Evaluator {
    /// The root evaluator: mlog emission disallowed, default globals bound.
    pub fn new_root(
        code: Vec<Token>,
        cwd: PathBuf,
        schem: Option<Rc<RefCell<SchemBuilder>>>,
    ) -> Evaluator {
        let eval = Evaluator {
            spawn: None,
            owners: Vec::new(),
            lines: read_lines(code),
            output: Vec::new(),
            cwd: cwd.clone(),
            global_cwd: cwd,
            scope_str: String::new(),
            macros: Rc::new(RefCell::new(HashMap::new())),
            macro_run_counts: Rc::new(RefCell::new(HashMap::new())),
            functions: Rc::new(RefCell::new(HashMap::new())),
            called_functions: Rc::new(RefCell::new(Vec::new())),
            vars: Rc::new(RefCell::new(HashMap::new())),
            global_vars: Rc::new(RefCell::new(HashMap::new())),
            schem,
            allow_mlog: false,
            is_root: true,
            is_processor: false,
            pointer: 0,
        };
        let mut globals = eval.global_vars.borrow_mut();
        globals.insert(
            "PROCESSOR_TYPE".to_string(),
            Token::content("@micro-processor"),
        );
        globals.insert(
            "SCHEMATIC_NAME".to_string(),
            Token::new(TokenKind::Str("\"SFMlog Schematic\"".to_string())),
        );
        globals.insert(
            "SCHEMATIC_DESCRIPTION".to_string(),
            Token::new(TokenKind::Str(
                "\"This schematic was generated using SFMlog.\"".to_string(),
            )),
        );
        drop(globals);
        eval
    }

    /// A child evaluator sharing this one's maps by handle.
    fn child(&self, spawn: Option<Token>, code: Vec<Token>) -> Evaluator {
        Evaluator {
            spawn,
            owners: self.owners.clone(),
            lines: read_lines(code),
            output: Vec::new(),
            cwd: self.cwd.clone(),
            global_cwd: self.global_cwd.clone(),
            scope_str: self.scope_str.clone(),
            macros: Rc::clone(&self.macros),
            macro_run_counts: Rc::clone(&self.macro_run_counts),
            functions: Rc::clone(&self.functions),
            called_functions: Rc::clone(&self.called_functions),
            vars: Rc::clone(&self.vars),
            global_vars: Rc::clone(&self.global_vars),
            schem: self.schem.clone(),
            allow_mlog: true,
            is_root: false,
            is_processor: false,
            pointer: 0,
        }
    }

    pub fn execute(&mut self) -> Result<(), TranspileError> {
        while self.pointer < self.lines.len() {
            let line = self.lines[self.pointer].clone();
            self.exec_line(&line)?;
            if !self.output.is_empty() && !self.allow_mlog {
                return Err(self.error(
                    "Mlog instructions not allowed outside a 'proc' statement",
                    line.head(),
                ));
            }
            self.pointer += 1;
        }
        if self.is_processor {
            self.expand_functions()?;
        }
        if self.is_root {
            self.finish_root();
        }
        Ok(())
    }

    fn exec_line(&mut self, line: &Line) -> Result<(), TranspileError> {
        let keyword = match &line.head().kind {
            TokenKind::Instruction(name) => name.clone(),
            _ => return self.output_line(line),
        };
        match keyword.as_str() {
            "import" => self.i_import(line),
            "block" => self.i_block(line),
            "proc" => self.i_proc(line),
            "defmac" => self.i_defmac(line),
            "mac" => self.i_mac(line),
            "deffun" => self.i_deffun(line),
            "fun" => self.i_fun(line),
            "getmac" => self.i_getmac(line),
            "setmac" => self.i_setmac(line),
            "type" => self.i_type(line),
            "pset" => self.i_pset(line),
            "pop" => self.i_pop(line),
            "strop" => self.i_strop(line),
            "strlabel" => self.i_strlabel(line),
            "strvar" => self.i_strvar(line),
            "list" => self.i_list(line),
            "table" => self.i_table(line),
            "file" => self.i_file(line),
            "if" => self.i_if(line),
            "while" => self.i_while(line),
            "for" => self.i_for(line),
            "discard" => self.i_discard(line),
            "log" => self.i_log(line),
            "error" => self.i_error(line),
            _ => self.output_line(line),
        }
    }

    /// Pass a line through to mlog output, resolving every token.
    fn output_line(&mut self, line: &Line) -> Result<(), TranspileError> {
        for token in &line.tokens {
            let resolved = self.resolve_var(token);
            if !resolved.exportable() {
                return Err(self.error(
                    format!(
                        "Unable to output type '{}' to mlog",
                        resolved.kind.tag_name()
                    ),
                    token,
                ));
            }
            self.output.push(resolved);
        }
        Ok(())
    }

    /// Consume lines up to the matching `end`, honoring nesting. `None`
    /// means the stream ran out first.
    fn read_till(&mut self, end_word: &str) -> Option<Vec<Token>> {
        let mut out = Vec::new();
        let mut level = 0usize;
        loop {
            self.pointer += 1;
            if self.pointer >= self.lines.len() {
                return None;
            }
            let line = &self.lines[self.pointer];
            let head_word = instruction_word(line);
            if BLOCK_INSTRUCTIONS.contains(&head_word) {
                level += 1;
            } else if head_word == end_word {
                if level == 0 {
                    return Some(out);
                }
                level -= 1;
            }
            out.extend(line.tokens.iter().cloned());
        }
    }

    /// Consume lines up to the matching `end`, splitting at `split_words`
    /// at nesting level zero. Each section is paired with its header line.
    fn read_sections(
        &mut self,
        end_word: &str,
        split_words: &[&str],
    ) -> Option<Vec<(Line, Vec<Token>)>> {
        let mut sections = Vec::new();
        let mut section: Vec<Token> = Vec::new();
        let mut header = self.lines[self.pointer].clone();
        let mut level = 0usize;
        loop {
            self.pointer += 1;
            if self.pointer >= self.lines.len() {
                return None;
            }
            let line = self.lines[self.pointer].clone();
            let head_word = instruction_word(&line);
            if BLOCK_INSTRUCTIONS.contains(&head_word) {
                section.extend(line.tokens.iter().cloned());
                level += 1;
            } else if head_word == end_word && level > 0 {
                section.extend(line.tokens.iter().cloned());
                level -= 1;
            } else if split_words.contains(&head_word) && level == 0 {
                sections.push((header, section));
                header = line;
                section = Vec::new();
            } else if head_word == end_word && level == 0 {
                sections.push((header, section));
                return Some(sections);
            } else {
                section.extend(line.tokens.iter().cloned());
            }
        }
    }

    /// Resolve a token to its value: bound identifiers substitute, unbound
    /// ones pick up the current scope stamp, special content names
    /// synthesize values.
    pub fn resolve_var(&self, name: &Token) -> Token {
        match &name.kind {
            TokenKind::Identifier(v) => {
                let key = format!("{}{}", name.scope.prefix(), v);
                if let Some(value) = self.vars.borrow().get(&key) {
                    return value.with_scope(&self.scope_str).at_token(name);
                }
                name.with_scope(&self.scope_str)
            }
            TokenKind::GlobalIdentifier(v) => {
                if let Some(value) = self.global_vars.borrow().get(v) {
                    return value.with_scope("").at_token(name);
                }
                name.with_scope(&self.scope_str)
            }
            TokenKind::Content(v) => {
                if let Some(value) = self.resolve_special(v) {
                    return value.at_token(name);
                }
                name.with_scope(&self.scope_str)
            }
            _ => name.with_scope(&self.scope_str),
        }
    }

    fn resolve_special(&self, name: &str) -> Option<Token> {
        match name {
            "@cwd" => Some(Token::string_auto(&self.cwd.display().to_string())),
            "@ctime" => {
                let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
                Some(Token::number(now.as_secs_f64() * 1000.0))
            }
            "@ptime" => Some(Token::number(
                process_start().elapsed().as_secs_f64() * 1000.0,
            )),
            _ => None,
        }
    }

    /// The host-string form of a value: strings unquoted with `\n` escapes
    /// applied, collections rendered recursively, all else as emitted.
    pub fn resolve_string(&self, token: &Token) -> String {
        let value = self.resolve_var(token);
        match &value.kind {
            TokenKind::Str(_) => value
                .string_content()
                .unwrap_or_default()
                .replace("\\n", "\n"),
            TokenKind::List(_) | TokenKind::Table(_) => display_value(&value),
            _ => value.to_string(),
        }
    }

    /// Bind a value. `_` discards, globals go to the global map, anything
    /// that is not an identifier is silently ignored.
    pub fn write_var(&self, name: &Token, value: Token) {
        match &name.kind {
            TokenKind::Identifier(v) => {
                if v != "_" {
                    let key = format!("{}{}", name.scope.prefix(), v);
                    self.vars.borrow_mut().insert(key, value);
                }
            }
            TokenKind::GlobalIdentifier(v) => {
                self.global_vars.borrow_mut().insert(v.clone(), value);
            }
            _ => {}
        }
    }

    /// Required argument at `index`.
    fn req<'a>(&self, line: &'a Line, index: usize) -> Result<&'a Token, TranspileError> {
        match line.tokens.get(index) {
            Some(t) if !matches!(t.kind, TokenKind::LineBreak) => Ok(t),
            Some(t) => Err(self.error(
                format!(
                    "Instruction '{}' expected argument at position {}",
                    line.head(),
                    index
                ),
                t,
            )),
            None => Err(self.error(
                format!(
                    "Instruction '{}' expected argument at position {}",
                    line.head(),
                    index
                ),
                line.last(),
            )),
        }
    }

    /// Optional argument at `index`, defaulting to `null` at the line end.
    fn opt(&self, line: &Line, index: usize) -> Token {
        line.get(index)
            .cloned()
            .unwrap_or_else(|| Token::null().at_token(line.last()))
    }

    /// The owner chain for diagnostics: enclosing spawn instructions plus
    /// this evaluator's own.
    pub fn trace_chain(&self) -> Vec<Token> {
        let mut chain = self.owners.clone();
        chain.extend(self.spawn.clone());
        chain
    }

    pub fn error(&self, message: impl Into<String>, token: &Token) -> TranspileError {
        TranspileError::at(message, token.clone()).with_trace(self.trace_chain())
    }

    /// `import PATH`: tokenize and evaluate another file in a child that
    /// shares this evaluator's maps; its output is appended to ours.
    fn i_import(&mut self, line: &Line) -> Result<(), TranspileError> {
        let path_tok = self.req(line, 1)?.clone();
        let resolved = self.resolve_var(&path_tok);
        let raw = match resolved.string_content() {
            Some(s) => s.to_string(),
            None => resolved
                .lexeme()
                .map(str::to_string)
                .unwrap_or_else(|| resolved.to_string()),
        };
        let mut path = PathBuf::from(&raw);
        if path.is_relative() {
            path = if is_std_path(&path) {
                install_dir().join(&path)
            } else {
                self.cwd.join(&path)
            };
        }
        debug!(path = %path.display(), "importing");
        let source = std::fs::read_to_string(&path)
            .map_err(|_| self.error(format!("File '{}' not found", path.display()), &path_tok))?;
        let tokens = tokenize(&source, Some(Rc::new(path.clone())))?;
        let mut child = self.child(Some(line.head().clone()), tokens);
        child.owners = self.trace_chain();
        child.cwd = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        child.execute()?;
        self.output.append(&mut child.output);
        Ok(())
    }

    /// `pset VAR VALUE`: compile-time assignment.
    fn i_pset(&mut self, line: &Line) -> Result<(), TranspileError> {
        let value = self.resolve_var(self.req(line, 2)?);
        self.write_var(self.req(line, 1)?, value);
        Ok(())
    }

    /// `type VAR VALUE`: the tag name of a value, as a string.
    fn i_type(&mut self, line: &Line) -> Result<(), TranspileError> {
        let value = self.resolve_var(self.req(line, 2)?);
        self.write_var(
            self.req(line, 1)?,
            Token::string_auto(value.kind.tag_name()),
        );
        Ok(())
    }

    fn i_log(&mut self, line: &Line) -> Result<(), TranspileError> {
        let text: String = line
            .args_from(1)
            .iter()
            .map(|t| self.resolve_string(t))
            .collect();
        println!("{}", text);
        Ok(())
    }

    fn i_error(&mut self, line: &Line) -> Result<(), TranspileError> {
        let text: String = line
            .args_from(1)
            .iter()
            .map(|t| self.resolve_string(t))
            .collect();
        Err(self.error(text, line.head()))
    }

    /// At root completion, publish the schematic globals to the packer.
    fn finish_root(&mut self) {
        let Some(schem) = &self.schem else { return };
        let globals = self.global_vars.borrow();
        let mut builder = schem.borrow_mut();
        if let Some(value) = globals.get("PROCESSOR_TYPE") {
            builder.processor_type = Some(value.clone());
        }
        if let Some(value) = globals.get("SCHEMATIC_NAME") {
            let name = string_or_display(value);
            builder.set_name(&name);
        }
        if let Some(value) = globals.get("SCHEMATIC_DESCRIPTION") {
            let desc = string_or_display(value);
            builder.set_desc(&desc);
        }
    }
}

fn string_or_display(value: &Token) -> String {
    match value.string_content() {
        Some(s) => s.replace("\\n", "\n"),
        None => value.to_string(),
    }
}

fn instruction_word(line: &Line) -> &str {
    match &line.head().kind {
        TokenKind::Instruction(name) => name.as_str(),
        _ => "",
    }
}

fn is_std_path(path: &Path) -> bool {
    let mut components = path.components();
    matches!(components.next(), Some(Component::Normal(first)) if first == "std")
        && components.next().is_some()
}

/// Directory the transpiler runs from, for `std/` imports.
fn install_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn process_start() -> &'static Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Evaluator {
        let tokens = tokenize(source, None).unwrap();
        let schem = Rc::new(RefCell::new(SchemBuilder::new()));
        let mut root = Evaluator::new_root(tokens, PathBuf::from("."), Some(schem));
        root.execute().unwrap();
        root
    }

    fn run_err(source: &str) -> TranspileError {
        let tokens = tokenize(source, None).unwrap();
        let schem = Rc::new(RefCell::new(SchemBuilder::new()));
        let mut root = Evaluator::new_root(tokens, PathBuf::from("."), Some(schem));
        root.execute().unwrap_err()
    }

    fn var(eval: &Evaluator, name: &str) -> Token {
        eval.resolve_var(&Token::identifier(name))
    }

    #[test]
    fn pset_binds_a_value() {
        let eval = run("pset x 5");
        assert_eq!(var(&eval, "x").to_string(), "5");
    }

    #[test]
    fn underscore_discards_writes() {
        let eval = run("pset _ 5");
        assert_eq!(var(&eval, "_").kind.tag_name(), "identifier");
    }

    #[test]
    fn globals_survive_into_the_global_map() {
        let eval = run("pset $G 7");
        let resolved = eval.resolve_var(&Token::new(TokenKind::GlobalIdentifier("G".to_string())));
        assert_eq!(resolved.to_string(), "7");
    }

    #[test]
    fn type_reports_the_tag() {
        let eval = run("pset x 5\ntype t x");
        assert_eq!(var(&eval, "t").to_string(), "\"number\"");
    }

    #[test]
    fn mlog_at_root_is_rejected() {
        let err = run_err("set x 1");
        assert!(err.message.contains("not allowed outside"));
    }

    #[test]
    fn error_instruction_aborts_with_message() {
        let err = run_err("error \"boom: \" 5");
        assert_eq!(err.message, "boom: 5");
    }

    #[test]
    fn unbound_identifiers_resolve_to_themselves() {
        let eval = run("pset x y");
        assert_eq!(var(&eval, "x").to_string(), "y");
    }

    #[test]
    fn missing_argument_is_reported() {
        let err = run_err("pset x");
        assert!(err.message.contains("expected argument at position 2"));
    }
}
