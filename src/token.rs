//! The token/value model.
//!
//! Tokens double as runtime values: every value the evaluator manipulates is
//! a token, and every token the tokenizer produces can flow through compile
//! time evaluation unchanged. The distinction is purely in the tag.

use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::rc::Rc;

use indexmap::IndexMap;

/// Scope stamp carried by identifiers and labels. Stamping is one-shot:
/// `with_scope` on an already-stamped token is a no-op, which is what makes
/// macro expansion hygienic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Unset,
    Set(Rc<str>),
}

impl Scope {
    pub fn prefix(&self) -> &str {
        match self {
            Scope::Unset => "",
            Scope::Set(s) => s,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Scope::Set(_))
    }
}

/// An rgba color literal, written `%rrggbbaa` in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// Parse 1 to 8 hex digits, right-padded with `000000ff`.
    pub fn from_hex(hex: &str) -> Option<Color> {
        if hex.is_empty() || hex.len() > 8 {
            return None;
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let padding = "000000ff";
        let full = format!("{}{}", hex, &padding[hex.len()..]);
        let byte = |i: usize| u8::from_str_radix(&full[i..i + 2], 16).ok();
        Some(Color {
            r: byte(0)?,
            g: byte(2)?,
            b: byte(4)?,
            a: byte(6)?,
        })
    }

    pub fn to_hex(self) -> String {
        format!("{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
    }
}

/// A macro definition, captured at `defmac` and immutable thereafter.
#[derive(Debug)]
pub struct Macro {
    pub name: String,
    pub body: Vec<Token>,
    pub params: Vec<Token>,
    pub cwd: PathBuf,
}

pub type ListHandle = Rc<RefCell<Vec<Token>>>;
pub type TableHandle = Rc<RefCell<IndexMap<TableKey, Token>>>;
pub type FileHandle = Rc<RefCell<Option<BufReader<File>>>>;

/// Table keys are restricted to primitive values. Numbers key by bit
/// pattern with negative zero normalized, so `0` and `-0` share a slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Num(u64),
    Str(String),
    Color([u8; 4]),
    Null,
}

impl TableKey {
    /// Convert a value into a key. Lists, tables, macros and file handles
    /// are not keyable and return `None`.
    pub fn from_token(token: &Token) -> Option<TableKey> {
        match &token.kind {
            TokenKind::Number(n) => {
                let n = if *n == 0.0 { 0.0 } else { *n };
                Some(TableKey::Num(n.to_bits()))
            }
            TokenKind::Str(s) => Some(TableKey::Str(unquote(s).to_string())),
            TokenKind::Content(v)
            | TokenKind::Identifier(v)
            | TokenKind::GlobalIdentifier(v)
            | TokenKind::UnscopedIdentifier(v)
            | TokenKind::Block(v) => Some(TableKey::Str(v.clone())),
            TokenKind::Color(c) => Some(TableKey::Color([c.r, c.g, c.b, c.a])),
            TokenKind::Null => Some(TableKey::Null),
            _ => None,
        }
    }

    /// Convert a key back into a value, for table iteration.
    pub fn to_token(&self) -> Token {
        match self {
            TableKey::Num(bits) => Token::number(f64::from_bits(*bits)),
            TableKey::Str(s) => Token::string_auto(s),
            TableKey::Color(c) => Token::new(TokenKind::Color(Color {
                r: c[0],
                g: c[1],
                b: c[2],
                a: c[3],
            })),
            TableKey::Null => Token::null(),
        }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKey::Num(bits) => write!(f, "{}", format_number(f64::from_bits(*bits))),
            TableKey::Str(s) => write!(f, "{}", s),
            TableKey::Color(c) => write!(f, "%{:02x}{:02x}{:02x}{:02x}", c[0], c[1], c[2], c[3]),
            TableKey::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TokenKind {
    /// 64-bit float; `true`/`false` lex to 1 and 0.
    Number(f64),
    /// Stored with its surrounding quotes.
    Str(String),
    /// Stored with its leading `@`.
    Content(String),
    Color(Color),
    Identifier(String),
    /// `$` stripped.
    GlobalIdentifier(String),
    UnscopedIdentifier(String),
    /// Trailing `:` kept.
    Label(String),
    /// `$` stripped, trailing `:` kept.
    GlobalLabel(String),
    Instruction(String),
    SubInstruction(String),
    LinkLiteral(String),
    /// A packer link name, produced by `block` and `proc`.
    Block(String),
    Null,
    LineBreak,
    List(ListHandle),
    Table(TableHandle),
    Macro(Rc<Macro>),
    TextFile(FileHandle),
    BinFile(FileHandle),
}

impl TokenKind {
    pub fn tag_name(&self) -> &'static str {
        match self {
            TokenKind::Number(_) => "number",
            TokenKind::Str(_) => "string",
            TokenKind::Content(_) => "content",
            TokenKind::Color(_) => "color",
            TokenKind::Identifier(_) => "identifier",
            TokenKind::GlobalIdentifier(_) => "global_identifier",
            TokenKind::UnscopedIdentifier(_) => "unscoped_identifier",
            TokenKind::Label(_) => "label",
            TokenKind::GlobalLabel(_) => "global_label",
            TokenKind::Instruction(_) => "instruction",
            TokenKind::SubInstruction(_) => "sub_instruction",
            TokenKind::LinkLiteral(_) => "link_literal",
            TokenKind::Block(_) => "block",
            TokenKind::Null => "null",
            TokenKind::LineBreak => "line_break",
            TokenKind::List(_) => "list",
            TokenKind::Table(_) => "table",
            TokenKind::Macro(_) => "macro",
            TokenKind::TextFile(_) => "text_file",
            TokenKind::BinFile(_) => "bin_file",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
    pub file: Option<Rc<PathBuf>>,
    pub scope: Scope,
}

impl Token {
    pub fn new(kind: TokenKind) -> Token {
        Token {
            kind,
            line: 0,
            column: 0,
            file: None,
            scope: Scope::Unset,
        }
    }

    pub fn number(value: f64) -> Token {
        Token::new(TokenKind::Number(value))
    }

    /// Wrap a raw host string the way compile-time results enter the value
    /// world: already-quoted text stays a string, `@`-prefixed text becomes
    /// a content reference, anything else is quoted.
    pub fn string_auto(value: &str) -> Token {
        if value.is_empty() {
            return Token::new(TokenKind::Str("\"\"".to_string()));
        }
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            return Token::new(TokenKind::Str(value.to_string()));
        }
        if value.starts_with('@') {
            return Token::new(TokenKind::Content(value.to_string()));
        }
        Token::new(TokenKind::Str(format!("\"{}\"", value)))
    }

    pub fn null() -> Token {
        Token::new(TokenKind::Null)
    }

    pub fn line_break() -> Token {
        Token::new(TokenKind::LineBreak)
    }

    pub fn instruction(value: &str) -> Token {
        Token::new(TokenKind::Instruction(value.to_string()))
    }

    pub fn sub_instruction(value: &str) -> Token {
        Token::new(TokenKind::SubInstruction(value.to_string()))
    }

    pub fn identifier(value: &str) -> Token {
        Token::new(TokenKind::Identifier(value.to_string()))
    }

    pub fn content(value: &str) -> Token {
        Token::new(TokenKind::Content(value.to_string()))
    }

    pub fn block(link_name: &str) -> Token {
        Token::new(TokenKind::Block(link_name.to_string()))
    }

    pub fn list(handle: ListHandle) -> Token {
        Token::new(TokenKind::List(handle))
    }

    pub fn table(handle: TableHandle) -> Token {
        Token::new(TokenKind::Table(handle))
    }

    pub fn at(mut self, line: u32, column: u32, file: Option<Rc<PathBuf>>) -> Token {
        self.line = line;
        self.column = column;
        self.file = file;
        self
    }

    /// Stamp a scope if none is set. Already-stamped tokens pass through
    /// untouched; the empty scope counts as stamped.
    pub fn with_scope(&self, scope: &str) -> Token {
        if self.scope.is_set() {
            return self.clone();
        }
        let mut out = self.clone();
        out.scope = Scope::Set(Rc::from(scope));
        out
    }

    /// Reposition at another token's source location, for diagnostics that
    /// should point at the use site rather than the definition site.
    pub fn at_token(&self, site: &Token) -> Token {
        let mut out = self.clone();
        out.line = site.line;
        out.column = site.column;
        out.file = site.file.clone();
        out
    }

    /// Whether the token may be emitted into mlog output. Collection,
    /// macro and file values exist only at compile time.
    pub fn exportable(&self) -> bool {
        !matches!(
            self.kind,
            TokenKind::List(_)
                | TokenKind::Table(_)
                | TokenKind::Macro(_)
                | TokenKind::TextFile(_)
                | TokenKind::BinFile(_)
        )
    }

    /// The raw textual payload, for kinds that carry one.
    pub fn lexeme(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Str(v)
            | TokenKind::Content(v)
            | TokenKind::Identifier(v)
            | TokenKind::GlobalIdentifier(v)
            | TokenKind::UnscopedIdentifier(v)
            | TokenKind::Label(v)
            | TokenKind::GlobalLabel(v)
            | TokenKind::Instruction(v)
            | TokenKind::SubInstruction(v)
            | TokenKind::LinkLiteral(v)
            | TokenKind::Block(v) => Some(v),
            TokenKind::Null => Some("null"),
            _ => None,
        }
    }

    /// String contents without the surrounding quotes, for `string` tokens.
    pub fn string_content(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Str(s) => Some(unquote(s)),
            _ => None,
        }
    }

    /// Tag-and-value equality, used for list membership and same-type
    /// comparisons. Aggregates compare by handle identity, not contents.
    pub fn same_value(&self, other: &Token) -> bool {
        match (&self.kind, &other.kind) {
            (TokenKind::Number(a), TokenKind::Number(b)) => a == b,
            (TokenKind::Color(a), TokenKind::Color(b)) => a == b,
            (TokenKind::Null, TokenKind::Null) => true,
            (TokenKind::LineBreak, TokenKind::LineBreak) => true,
            (TokenKind::List(a), TokenKind::List(b)) => Rc::ptr_eq(a, b),
            (TokenKind::Table(a), TokenKind::Table(b)) => Rc::ptr_eq(a, b),
            (TokenKind::Macro(a), TokenKind::Macro(b)) => Rc::ptr_eq(a, b),
            (TokenKind::TextFile(a), TokenKind::TextFile(b)) => Rc::ptr_eq(a, b),
            (TokenKind::BinFile(a), TokenKind::BinFile(b)) => Rc::ptr_eq(a, b),
            (a, b) if a.tag_name() == b.tag_name() => self.lexeme() == other.lexeme(),
            _ => false,
        }
    }

    /// Deep clone: lists and tables get fresh handles recursively, so the
    /// copy no longer aliases the original. Values never form cycles.
    pub fn deep_copy(&self) -> Token {
        let mut out = self.clone();
        out.kind = match &self.kind {
            TokenKind::List(h) => {
                let items: Vec<Token> = h.borrow().iter().map(Token::deep_copy).collect();
                TokenKind::List(Rc::new(RefCell::new(items)))
            }
            TokenKind::Table(h) => {
                let entries: IndexMap<TableKey, Token> = h
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect();
                TokenKind::Table(Rc::new(RefCell::new(entries)))
            }
            other => other.clone(),
        };
        out
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Identifier(v) | TokenKind::Label(v) => {
                write!(f, "{}{}", self.scope.prefix(), v)
            }
            TokenKind::GlobalIdentifier(v) | TokenKind::GlobalLabel(v) => {
                write!(f, "global_{}", v)
            }
            TokenKind::Number(n) => write!(f, "{}", format_number(*n)),
            TokenKind::Str(s) => write!(f, "{}", s),
            TokenKind::Color(c) => write!(f, "%{}", c.to_hex()),
            TokenKind::Null => write!(f, "null"),
            TokenKind::LineBreak => writeln!(f),
            TokenKind::Content(v)
            | TokenKind::UnscopedIdentifier(v)
            | TokenKind::Instruction(v)
            | TokenKind::SubInstruction(v)
            | TokenKind::LinkLiteral(v)
            | TokenKind::Block(v) => write!(f, "{}", v),
            TokenKind::Macro(m) => write!(f, "macro({})", m.name),
            TokenKind::List(_) => write!(f, "list"),
            TokenKind::Table(_) => write!(f, "table"),
            TokenKind::TextFile(_) => write!(f, "text_file"),
            TokenKind::BinFile(_) => write!(f, "bin_file"),
        }
    }
}

/// Integral finite values print without a decimal point; everything else
/// uses the shortest float form.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Render a token stream back to mlog text: tokens are space separated
/// within a line, line breaks are literal newlines.
pub fn token_list_to_str(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut at_line_start = true;
    for token in tokens {
        if matches!(token.kind, TokenKind::LineBreak) {
            out.push('\n');
            at_line_start = true;
            continue;
        }
        if !at_line_start {
            out.push(' ');
        }
        out.push_str(&token.to_string());
        at_line_start = false;
    }
    out
}

/// Recursive display of a value, rendering lists as `[a, b]` and tables as
/// `{k: v}`; used by `log` and string conversion.
pub fn display_value(token: &Token) -> String {
    match &token.kind {
        TokenKind::List(h) => {
            let parts: Vec<String> = h.borrow().iter().map(display_value).collect();
            format!("[{}]", parts.join(", "))
        }
        TokenKind::Table(h) => {
            let parts: Vec<String> = h
                .borrow()
                .iter()
                .map(|(k, v)| format!("{}: {}", k, display_value(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        _ => token.to_string(),
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_scope_is_one_shot() {
        let token = Token::identifier("x").with_scope("m_foo_0_");
        let restamped = token.with_scope("m_bar_1_");
        assert_eq!(restamped.to_string(), "m_foo_0_x");
    }

    #[test]
    fn empty_scope_counts_as_stamped() {
        let token = Token::identifier("x").with_scope("");
        let restamped = token.with_scope("m_foo_0_");
        assert_eq!(restamped.to_string(), "x");
    }

    #[test]
    fn color_pads_to_eight_digits() {
        let color = Color::from_hex("ff00").unwrap();
        assert_eq!(color.to_hex(), "ff0000ff");
    }

    #[test]
    fn color_rejects_empty_and_long_hex() {
        assert!(Color::from_hex("").is_none());
        assert!(Color::from_hex("aabbccddee").is_none());
        assert!(Color::from_hex("xyz").is_none());
    }

    #[test]
    fn integral_numbers_render_without_point() {
        assert_eq!(Token::number(3.0).to_string(), "3");
        assert_eq!(Token::number(2.5).to_string(), "2.5");
        assert_eq!(Token::number(-4.0).to_string(), "-4");
    }

    #[test]
    fn global_identifier_renders_prefixed() {
        let token = Token::new(TokenKind::GlobalIdentifier("SPEED".to_string()));
        assert_eq!(token.to_string(), "global_SPEED");
    }

    #[test]
    fn string_auto_quotes_and_passes_content() {
        assert_eq!(Token::string_auto("hi").to_string(), "\"hi\"");
        assert_eq!(Token::string_auto("\"hi\"").to_string(), "\"hi\"");
        assert_eq!(Token::string_auto("@copper").kind.tag_name(), "content");
        assert_eq!(Token::string_auto("").to_string(), "\"\"");
    }

    #[test]
    fn lists_compare_by_handle() {
        let a = Token::list(Rc::new(RefCell::new(vec![Token::number(1.0)])));
        let b = Token::list(Rc::new(RefCell::new(vec![Token::number(1.0)])));
        assert!(!a.same_value(&b));
        assert!(a.same_value(&a.clone()));
    }

    #[test]
    fn deep_copy_breaks_aliasing() {
        let handle: ListHandle = Rc::new(RefCell::new(vec![Token::number(1.0)]));
        let original = Token::list(handle.clone());
        let copy = original.deep_copy();
        handle.borrow_mut().push(Token::number(2.0));
        match &copy.kind {
            TokenKind::List(h) => assert_eq!(h.borrow().len(), 1),
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn table_keys_unify_strings_and_identifiers() {
        let from_string = TableKey::from_token(&Token::string_auto("x")).unwrap();
        let from_ident = TableKey::from_token(&Token::identifier("x")).unwrap();
        assert_eq!(from_string, from_ident);
    }

    #[test]
    fn token_stream_renders_with_line_breaks() {
        let tokens = vec![
            Token::instruction("set"),
            Token::identifier("x"),
            Token::number(1.0),
            Token::line_break(),
        ];
        assert_eq!(token_list_to_str(&tokens), "set x 1\n");
    }
}
