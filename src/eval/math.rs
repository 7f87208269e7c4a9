//! Compile-time arithmetic: `pop` and the condition evaluator behind
//! `if`/`while`.
//!
//! Mixed-type operands coerce to numbers. Same-type operands compare raw
//! when the operation is a condition, so string comparisons are
//! lexicographic and `strictEqual` can insist on matching tags.

use std::cmp::Ordering;

use rand::Rng;

use super::{Evaluator, Line};
use crate::error::TranspileError;
use crate::token::{TableKey, Token, TokenKind};

const CONDITIONS: &[&str] = &[
    "equal",
    "notEqual",
    "lessThan",
    "greaterThan",
    "lessThanEq",
    "greaterThanEq",
    "strictEqual",
];

/// The truthiness of a condition result.
pub fn token_truthy(token: &Token) -> bool {
    match &token.kind {
        TokenKind::Number(n) => *n != 0.0,
        TokenKind::List(h) => !h.borrow().is_empty(),
        TokenKind::Table(h) => !h.borrow().is_empty(),
        _ => true,
    }
}

impl Evaluator {
    /// `pop OP OUT A [B]`
    pub(super) fn i_pop(&mut self, line: &Line) -> Result<(), TranspileError> {
        let op = self.req(line, 1)?.clone();
        let out = self.req(line, 2)?.clone();
        let a = self.resolve_var(self.req(line, 3)?);
        let b = self.resolve_var(&self.opt(line, 4));
        let result = self.eval_math(&op, &a, &b)?;
        self.write_var(&out, result);
        Ok(())
    }

    /// Numbers pass through; null, the empty string and bare identifiers
    /// read as zero; every other value reads as one.
    pub fn coerce_num(&self, token: &Token) -> f64 {
        match &token.kind {
            TokenKind::Number(n) => *n,
            TokenKind::Null => 0.0,
            TokenKind::Str(s) if s == "\"\"" => 0.0,
            TokenKind::Identifier(_) | TokenKind::GlobalIdentifier(_) => 0.0,
            _ => 1.0,
        }
    }

    pub fn eval_math(&self, op: &Token, a: &Token, b: &Token) -> Result<Token, TranspileError> {
        let name = op.lexeme().unwrap_or_default();
        let same_type = a.kind.tag_name() == b.kind.tag_name();

        if same_type && CONDITIONS.contains(&name) {
            let out = match name {
                "equal" | "strictEqual" => a.same_value(b),
                "notEqual" => !a.same_value(b),
                _ => self.raw_order(name, a, b),
            };
            return Ok(Token::number(out as u8 as f64));
        }

        let x = self.coerce_num(a);
        let y = self.coerce_num(b);
        let out: f64 = match name {
            "add" => x + y,
            "sub" => x - y,
            "mul" => x * y,
            "div" => {
                if y == 0.0 {
                    return Err(self.error("Division by zero", op));
                }
                x / y
            }
            "idiv" => {
                if y == 0.0 {
                    return Err(self.error("Division by zero", op));
                }
                (x / y).floor()
            }
            "mod" => {
                if y == 0.0 {
                    return Err(self.error("Division by zero", op));
                }
                x - y * (x / y).floor()
            }
            "pow" => x.powf(y),
            "equal" => (x == y) as u8 as f64,
            "notEqual" => (x != y) as u8 as f64,
            "land" => {
                if x == 0.0 {
                    x
                } else {
                    y
                }
            }
            "lessThan" => (x < y) as u8 as f64,
            "lessThanEq" => (x <= y) as u8 as f64,
            "greaterThan" => (x > y) as u8 as f64,
            "greaterThanEq" => (x >= y) as u8 as f64,
            "strictEqual" => 0.0,
            "shl" => shift(x, y, |v, s| v << s),
            "shr" => shift(x, y, |v, s| v >> s),
            "or" => ((x as i64) | (y as i64)) as f64,
            "and" => ((x as i64) & (y as i64)) as f64,
            "xor" => ((x as i64) ^ (y as i64)) as f64,
            "not" => !(x as i64) as f64,
            "max" => x.max(y),
            "min" => x.min(y),
            "angle" => x.atan2(y).to_degrees(),
            "angleDiff" => angle_diff(x, y),
            "len" => x.hypot(y),
            "abs" => x.abs(),
            "log" => x.ln(),
            "log10" => x.log10(),
            "floor" => x.floor(),
            "ceil" => x.ceil(),
            "sqrt" => x.sqrt(),
            "rand" => uniform(x),
            "sin" => x.sin(),
            "cos" => x.cos(),
            "tan" => x.tan(),
            "asin" => x.asin(),
            "acos" => x.acos(),
            "atan" => x.atan(),
            _ => return Err(self.error(format!("Unknown operation \"{}\"", name), op)),
        };
        Ok(Token::number(out))
    }

    pub fn eval_condition(&self, op: &Token, a: &Token, b: &Token) -> Result<Token, TranspileError> {
        let name = op.lexeme().unwrap_or_default();
        let same_type = a.kind.tag_name() == b.kind.tag_name();
        let truth = match name {
            "equal" => {
                if same_type {
                    a.same_value(b)
                } else {
                    self.coerce_num(a) == self.coerce_num(b)
                }
            }
            "notEqual" => {
                if same_type {
                    !a.same_value(b)
                } else {
                    self.coerce_num(a) != self.coerce_num(b)
                }
            }
            "strictEqual" => same_type && a.same_value(b),
            "land" => {
                if same_type {
                    token_truthy(a) && token_truthy(b)
                } else {
                    self.coerce_num(a) != 0.0 && self.coerce_num(b) != 0.0
                }
            }
            "lessThan" | "lessThanEq" | "greaterThan" | "greaterThanEq" => {
                if same_type {
                    self.raw_order(name, a, b)
                } else {
                    let x = self.coerce_num(a);
                    let y = self.coerce_num(b);
                    match name {
                        "lessThan" => x < y,
                        "lessThanEq" => x <= y,
                        "greaterThan" => x > y,
                        _ => x >= y,
                    }
                }
            }
            "in" => self.contains(a, b),
            _ => return Err(self.error(format!("Unknown condition \"{}\"", name), op)),
        };
        Ok(Token::number(truth as u8 as f64))
    }

    /// Same-type ordering: numeric for numbers, lexicographic for anything
    /// carrying text, coerced otherwise.
    fn raw_order(&self, name: &str, a: &Token, b: &Token) -> bool {
        let ordering = match (&a.kind, &b.kind) {
            (TokenKind::Number(x), TokenKind::Number(y)) => x.partial_cmp(y),
            _ => match (a.lexeme(), b.lexeme()) {
                (Some(x), Some(y)) => Some(x.cmp(y)),
                _ => self.coerce_num(a).partial_cmp(&self.coerce_num(b)),
            },
        };
        match ordering {
            Some(Ordering::Less) => matches!(name, "lessThan" | "lessThanEq"),
            Some(Ordering::Equal) => matches!(name, "lessThanEq" | "greaterThanEq"),
            Some(Ordering::Greater) => matches!(name, "greaterThan" | "greaterThanEq"),
            None => false,
        }
    }

    /// `in`: list membership by tag and value, table membership by key.
    fn contains(&self, container: &Token, item: &Token) -> bool {
        match &container.kind {
            TokenKind::List(h) => h.borrow().iter().any(|elem| elem.same_value(item)),
            TokenKind::Table(h) => match TableKey::from_token(item) {
                Some(key) => h.borrow().contains_key(&key),
                None => false,
            },
            _ => false,
        }
    }
}

fn shift(x: f64, y: f64, op: fn(i64, i64) -> i64) -> f64 {
    let amount = y as i64;
    if (0..64).contains(&amount) {
        op(x as i64, amount) as f64
    } else {
        0.0
    }
}

fn angle_diff(x: f64, y: f64) -> f64 {
    let a = x.rem_euclid(360.0);
    let b = y.rem_euclid(360.0);
    let forward = if a - b < 0.0 { a - b + 360.0 } else { a - b };
    let backward = if b - a < 0.0 { b - a + 360.0 } else { b - a };
    forward.min(backward)
}

fn uniform(upper: f64) -> f64 {
    let (lo, hi) = if upper >= 0.0 { (0.0, upper) } else { (upper, 0.0) };
    if lo == hi {
        lo
    } else {
        rand::thread_rng().gen_range(lo..=hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schematic::SchemBuilder;
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;

    fn eval() -> Evaluator {
        Evaluator::new_root(
            Vec::new(),
            PathBuf::from("."),
            Some(Rc::new(RefCell::new(SchemBuilder::new()))),
        )
    }

    fn math(op: &str, a: Token, b: Token) -> Token {
        let e = eval();
        e.eval_math(&Token::sub_instruction(op), &a, &b).unwrap()
    }

    fn num(op: &str, a: f64, b: f64) -> f64 {
        match math(op, Token::number(a), Token::number(b)).kind {
            TokenKind::Number(n) => n,
            _ => panic!("expected number"),
        }
    }

    #[test]
    fn idiv_floors_toward_negative_infinity() {
        assert_eq!(num("idiv", 7.0, 2.0), 3.0);
        assert_eq!(num("idiv", -7.0, 2.0), -4.0);
    }

    #[test]
    fn modulo_follows_the_divisor_sign() {
        assert_eq!(num("mod", -7.0, 3.0), 2.0);
        assert_eq!(num("mod", 7.0, -3.0), -2.0);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let e = eval();
        let err = e
            .eval_math(
                &Token::sub_instruction("div"),
                &Token::number(1.0),
                &Token::number(0.0),
            )
            .unwrap_err();
        assert!(err.message.contains("Division by zero"));
    }

    #[test]
    fn strict_equal_is_false_on_tag_mismatch() {
        let out = math("strictEqual", Token::number(0.0), Token::null());
        assert_eq!(out.to_string(), "0");
        let out = math("strictEqual", Token::number(2.0), Token::number(2.0));
        assert_eq!(out.to_string(), "1");
    }

    #[test]
    fn equal_coerces_across_tags() {
        // null coerces to 0, so `equal null 0` holds.
        let out = math("equal", Token::null(), Token::number(0.0));
        assert_eq!(out.to_string(), "1");
    }

    #[test]
    fn same_type_strings_compare_lexicographically() {
        let e = eval();
        let a = Token::string_auto("apple");
        let b = Token::string_auto("banana");
        let out = e
            .eval_condition(&Token::sub_instruction("lessThan"), &a, &b)
            .unwrap();
        assert!(token_truthy(&out));
    }

    #[test]
    fn bitwise_ops_truncate_to_integers() {
        assert_eq!(num("shl", 1.0, 4.0), 16.0);
        assert_eq!(num("shr", 16.0, 4.0), 1.0);
        assert_eq!(num("xor", 6.0, 3.0), 5.0);
        assert_eq!(num("not", 0.0, 0.0), -1.0);
    }

    #[test]
    fn oversized_shifts_collapse_to_zero() {
        assert_eq!(num("shl", 1.0, 200.0), 0.0);
    }

    #[test]
    fn angle_diff_wraps_around() {
        assert_eq!(num("angleDiff", 350.0, 10.0), 20.0);
        assert_eq!(num("angleDiff", 10.0, 350.0), 20.0);
    }

    #[test]
    fn rand_stays_in_range() {
        for _ in 0..100 {
            let v = num("rand", 10.0, 0.0);
            assert!((0.0..=10.0).contains(&v));
        }
    }

    #[test]
    fn unknown_operation_is_an_error() {
        let e = eval();
        assert!(e
            .eval_math(
                &Token::sub_instruction("frobnicate"),
                &Token::number(1.0),
                &Token::number(1.0),
            )
            .is_err());
    }

    #[test]
    fn in_condition_checks_list_membership() {
        let e = eval();
        let list = Token::list(Rc::new(RefCell::new(vec![
            Token::number(1.0),
            Token::string_auto("x"),
        ])));
        let hit = e
            .eval_condition(&Token::sub_instruction("in"), &list, &Token::number(1.0))
            .unwrap();
        assert!(token_truthy(&hit));
        let miss = e
            .eval_condition(&Token::sub_instruction("in"), &list, &Token::number(2.0))
            .unwrap();
        assert!(!token_truthy(&miss));
    }
}
