//! The tokenizer.
//!
//! Scans line regions (skipping comment and empty lines), extracts lexemes,
//! and classifies them statefully: what a bare word means depends on where it
//! sits in the line and on which instruction opened the line. The
//! sub-instruction table and the link-block lexicon below are closed sets.

use std::path::PathBuf;
use std::rc::Rc;

use crate::error::TranspileError;
use crate::token::{Color, Token, TokenKind};

/// For each instruction, which argument slots hold keywords rather than
/// identifiers. A missing entry means every slot is an identifier.
pub fn sub_instruction_slots(instruction: &str) -> Option<&'static [bool]> {
    Some(match instruction {
        "draw" | "control" | "op" | "lookup" | "ucontrol" | "getblock" | "setblock"
        | "setrule" | "message" | "cutscene" | "effect" | "fetch" | "setmarker"
        | "makemarker" | "pop" | "if" | "while" | "for" | "strop" => &[true],
        "radar" | "uradar" => &[true, true, true, true],
        "ulocate" | "status" => &[true, true],
        "jump" => &[false, true],
        _ => return None,
    })
}

/// Block-name stems that, followed by digits, read as processor link names.
pub const LINK_BLOCKS: &[&str] = &[
    "gate", "foundation", "wall", "container", "afflict", "heater", "conveyor", "duct",
    "press", "tower", "pad", "projector", "swarmer", "factory", "drill", "router", "door",
    "illuminator", "processor", "sorter", "spectre", "parallax", "cell", "electrolyzer",
    "display", "chamber", "mixer", "conduit", "distributor", "crucible", "message",
    "unloader", "refabricator", "switch", "bore", "bank", "accelerator", "disperse",
    "vault", "point", "nucleus", "panel", "node", "condenser", "smelter", "pump",
    "generator", "tank", "reactor", "cultivator", "malign", "synthesizer",
    "deconstructor", "meltdown", "centrifuge", "radar", "driver", "void", "junction",
    "diffuse", "pulverizer", "salvo", "bridge", "acropolis", "dome", "reconstructor",
    "separator", "citadel", "concentrator", "mender", "lancer", "source", "loader",
    "duo", "melter", "crusher", "fabricator", "redirector", "disassembler", "gigantic",
    "incinerator", "scorch", "battery", "tsunami", "arc", "compressor", "assembler",
    "smite", "module", "bastion", "segment", "constructor", "ripple", "furnace", "wave",
    "foreshadow", "link", "mine", "scathe", "canvas", "diode", "extractor", "fuse",
    "kiln", "sublimate", "scatter", "cyclone", "titan", "turret", "lustre", "thruster",
    "shard", "weaver", "huge", "breach", "hail",
];

/// Tokenize a source buffer. The returned stream never contains two
/// consecutive line breaks and, when nonempty, always ends with one.
pub fn tokenize(source: &str, file: Option<Rc<PathBuf>>) -> Result<Vec<Token>, TranspileError> {
    Lexer::new(source, file).run()
}

struct Lexer<'a> {
    source: &'a str,
    file: Option<Rc<PathBuf>>,
    tokens: Vec<Token>,
    prev_was_break: bool,
    prev_instruction: String,
    dist_from_instruction: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str, file: Option<Rc<PathBuf>>) -> Self {
        Lexer {
            source,
            file,
            tokens: Vec::new(),
            prev_was_break: true,
            prev_instruction: String::new(),
            dist_from_instruction: 0,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, TranspileError> {
        for (line_idx, line) in self.source.lines().enumerate() {
            let line_number = line_idx as u32 + 1;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.scan_line(line, line_number)?;
            self.push(TokenKind::LineBreak, line_number, line.chars().count() as u32 + 1);
        }
        let missing_break = match self.tokens.last() {
            Some(last) if !matches!(last.kind, TokenKind::LineBreak) => Some(last.line),
            _ => None,
        };
        if let Some(line) = missing_break {
            self.push(TokenKind::LineBreak, line, 0);
        }
        Ok(self.tokens)
    }

    fn scan_line(&mut self, line: &str, line_number: u32) -> Result<(), TranspileError> {
        let chars: Vec<char> = line.chars().collect();
        let mut pos = 0;
        while pos < chars.len() {
            let c = chars[pos];
            if c == ' ' || c == '\t' || c == '\r' {
                pos += 1;
                continue;
            }
            if c == '#' {
                break;
            }
            let column = pos as u32 + 1;
            if c == ';' {
                self.push(TokenKind::LineBreak, line_number, column);
                pos += 1;
                continue;
            }
            let lexeme = if c == '"' {
                match chars[pos + 1..].iter().position(|&ch| ch == '"') {
                    Some(offset) => {
                        let end = pos + 1 + offset;
                        let s: String = chars[pos..=end].iter().collect();
                        pos = end + 1;
                        s
                    }
                    None => self.take_word(&chars, &mut pos),
                }
            } else {
                self.take_word(&chars, &mut pos)
            };
            let kind = self.classify(&lexeme, line_number, column)?;
            self.push(kind, line_number, column);
        }
        Ok(())
    }

    fn take_word(&self, chars: &[char], pos: &mut usize) -> String {
        let start = *pos;
        while *pos < chars.len() {
            let c = chars[*pos];
            if c == ' ' || c == '\t' || c == '\r' || c == ';' {
                break;
            }
            *pos += 1;
        }
        chars[start..*pos].iter().collect()
    }

    fn push(&mut self, kind: TokenKind, line: u32, column: u32) {
        let is_break = matches!(kind, TokenKind::LineBreak);
        self.dist_from_instruction += 1;
        if let TokenKind::Instruction(name) = &kind {
            self.prev_instruction = name.clone();
            self.dist_from_instruction = 0;
        }
        if is_break && self.prev_was_break {
            return;
        }
        self.tokens
            .push(Token::new(kind).at(line, column, self.file.clone()));
        self.prev_was_break = is_break;
    }

    fn classify(&self, lexeme: &str, line: u32, column: u32) -> Result<TokenKind, TranspileError> {
        let fail = |message: &str| {
            Err(TranspileError::at(
                message,
                Token::identifier(lexeme).at(line, column, self.file.clone()),
            ))
        };

        if lexeme.len() >= 2 && lexeme.starts_with('"') && lexeme.ends_with('"') {
            return Ok(TokenKind::Str(lexeme.to_string()));
        }
        if lexeme.starts_with('"') || lexeme.ends_with('"') {
            return fail("String not closed");
        }
        if let Some(hex) = lexeme.strip_prefix('%') {
            return match Color::from_hex(hex) {
                Some(color) => Ok(TokenKind::Color(color)),
                None => fail("Invalid color"),
            };
        }
        if let Some(digits) = lexeme.strip_prefix("0x") {
            if digits.chars().all(|c| c.is_ascii_hexdigit()) {
                return match u64::from_str_radix(digits, 16) {
                    Ok(v) => Ok(TokenKind::Number(v as f64)),
                    Err(_) => fail("Invalid number"),
                };
            }
        }
        if let Some(digits) = lexeme.strip_prefix("0b") {
            if digits.chars().all(|c| c == '0' || c == '1') {
                return match u64::from_str_radix(digits, 2) {
                    Ok(v) => Ok(TokenKind::Number(v as f64)),
                    Err(_) => fail("Invalid number"),
                };
            }
        }
        if is_decimal_shape(lexeme) || is_exponent_shape(lexeme) {
            return match lexeme.parse::<f64>() {
                Ok(v) => Ok(TokenKind::Number(v)),
                Err(_) => fail("Invalid number"),
            };
        }
        if lexeme == "true" {
            return Ok(TokenKind::Number(1.0));
        }
        if lexeme == "false" {
            return Ok(TokenKind::Number(0.0));
        }
        if lexeme.starts_with('@') {
            return Ok(TokenKind::Content(lexeme.to_string()));
        }
        let stem = lexeme.trim_end_matches(|c: char| c.is_ascii_digit());
        if stem != lexeme && LINK_BLOCKS.contains(&stem) {
            return Ok(TokenKind::LinkLiteral(lexeme.to_string()));
        }
        if self.prev_was_break {
            return Ok(if lexeme.ends_with(':') {
                match lexeme.strip_prefix('$') {
                    Some(name) => TokenKind::GlobalLabel(name.to_string()),
                    None => TokenKind::Label(lexeme.to_string()),
                }
            } else {
                TokenKind::Instruction(lexeme.to_string())
            });
        }
        if let Some(slots) = sub_instruction_slots(&self.prev_instruction) {
            let slot = self.dist_from_instruction;
            if slot < slots.len() && slots[slot] {
                return Ok(TokenKind::SubInstruction(lexeme.to_string()));
            }
        }
        if let Some(name) = lexeme.strip_prefix('$') {
            return Ok(TokenKind::GlobalIdentifier(name.to_string()));
        }
        if lexeme == "null" {
            return Ok(TokenKind::Null);
        }
        Ok(TokenKind::Identifier(lexeme.to_string()))
    }
}

fn is_decimal_shape(lexeme: &str) -> bool {
    let rest = lexeme.strip_prefix('-').unwrap_or(lexeme);
    if rest.is_empty() {
        return lexeme == "-";
    }
    let mut parts = rest.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let frac = parts.next();
    whole.chars().all(|c| c.is_ascii_digit())
        && frac.map_or(true, |f| f.chars().all(|c| c.is_ascii_digit()))
}

fn is_exponent_shape(lexeme: &str) -> bool {
    let mut parts = lexeme.splitn(2, 'e');
    let mantissa = parts.next().unwrap_or("");
    match parts.next() {
        Some(exponent) => is_decimal_shape(mantissa) && is_decimal_shape(exponent),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        tokenize(source, None).expect("tokenize failed")
    }

    fn kinds(source: &str) -> Vec<String> {
        lex(source)
            .iter()
            .map(|t| t.kind.tag_name().to_string())
            .collect()
    }

    #[test]
    fn line_head_is_instruction() {
        assert_eq!(
            kinds("set x 1"),
            vec!["instruction", "identifier", "number", "line_break"]
        );
    }

    #[test]
    fn op_first_slot_is_sub_instruction() {
        assert_eq!(
            kinds("op add out a b"),
            vec![
                "instruction",
                "sub_instruction",
                "identifier",
                "identifier",
                "identifier",
                "line_break"
            ]
        );
    }

    #[test]
    fn jump_second_slot_is_sub_instruction() {
        assert_eq!(
            kinds("jump target always"),
            vec!["instruction", "identifier", "sub_instruction", "line_break"]
        );
    }

    #[test]
    fn radar_marks_four_slots() {
        let got = kinds("radar enemy any any distance turret1 1 out");
        assert_eq!(
            got,
            vec![
                "instruction",
                "sub_instruction",
                "sub_instruction",
                "sub_instruction",
                "sub_instruction",
                "link_literal",
                "number",
                "identifier",
                "line_break"
            ]
        );
    }

    #[test]
    fn labels_and_global_labels() {
        assert_eq!(kinds("loop:"), vec!["label", "line_break"]);
        assert_eq!(kinds("$loop:"), vec!["global_label", "line_break"]);
    }

    #[test]
    fn numbers_in_every_base() {
        let tokens = lex("set x 0x1f\nset y 0b101\nset z -2.5\nset w 1e3");
        let values: Vec<f64> = tokens
            .iter()
            .filter_map(|t| match t.kind {
                TokenKind::Number(n) => Some(n),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![31.0, 5.0, -2.5, 1000.0]);
    }

    #[test]
    fn true_false_lex_to_numbers() {
        let tokens = lex("set x true\nset y false");
        let values: Vec<f64> = tokens
            .iter()
            .filter_map(|t| match t.kind {
                TokenKind::Number(n) => Some(n),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![1.0, 0.0]);
    }

    #[test]
    fn bare_minus_is_rejected() {
        assert!(tokenize("set x -", None).is_err());
    }

    #[test]
    fn semicolons_split_lines() {
        assert_eq!(
            kinds("set x 1; set y 2"),
            vec![
                "instruction",
                "identifier",
                "number",
                "line_break",
                "instruction",
                "identifier",
                "number",
                "line_break"
            ]
        );
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        assert_eq!(
            kinds("# header\n\nset x 1 # trailing\n"),
            vec!["instruction", "identifier", "number", "line_break"]
        );
    }

    #[test]
    fn no_consecutive_line_breaks() {
        let tokens = lex("set x 1;;\n\nset y 2");
        let mut prev_break = false;
        for token in &tokens {
            let is_break = matches!(token.kind, TokenKind::LineBreak);
            assert!(!(is_break && prev_break), "double line break");
            prev_break = is_break;
        }
    }

    #[test]
    fn strings_keep_quotes_and_spaces() {
        let tokens = lex("print \"a b\"");
        assert_eq!(tokens[1].to_string(), "\"a b\"");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(tokenize("print \"oops", None).is_err());
    }

    #[test]
    fn color_literals_parse() {
        let tokens = lex("draw col %ff0000");
        match tokens[2].kind {
            TokenKind::Color(c) => {
                assert_eq!((c.r, c.g, c.b, c.a), (255, 0, 0, 255));
            }
            _ => panic!("expected color"),
        }
    }

    #[test]
    fn invalid_color_is_an_error() {
        assert!(tokenize("draw col %zz", None).is_err());
        assert!(tokenize("draw col %", None).is_err());
    }

    #[test]
    fn link_literal_requires_digits() {
        assert_eq!(kinds("sensor x cell1 @copper")[2], "link_literal");
        assert_eq!(kinds("sensor x cell @copper")[2], "identifier");
    }

    #[test]
    fn global_identifier_strips_dollar() {
        let tokens = lex("pset $NAME 1");
        match &tokens[1].kind {
            TokenKind::GlobalIdentifier(v) => assert_eq!(v, "NAME"),
            other => panic!("expected global identifier, got {:?}", other),
        }
    }

    #[test]
    fn positions_are_one_based() {
        let tokens = lex("set x 1\nset y 2");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (1, 5));
        assert_eq!((tokens[4].line, tokens[4].column), (2, 1));
    }
}
