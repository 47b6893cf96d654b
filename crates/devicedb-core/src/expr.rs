//! Restricted expression evaluator for header macro bodies
//!
//! Only integer arithmetic over decimal and hex literals and single string literals
//! are accepted. Anything else is rejected so the caller can fall back to the
//! literal macro text.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, hex_digit1, multispace0},
    combinator::{all_consuming, map, map_res, value},
    multi::fold_many0,
    sequence::{delimited, pair, preceded},
    Finish,
};
use thiserror::Error;

type IResult<'a, T> = nom::IResult<&'a str, T>;

/// Deepest accepted nesting of parentheses and unary operators
const MAX_NESTING: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("Unsupported expression near '{0}'")]
    Syntax(String),
    #[error("Arithmetic error evaluating '{0}'")]
    Arithmetic(String),
}

/// Result of evaluating a macro body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Lit(i64),
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
}

impl Expr {
    fn eval(&self) -> Option<i64> {
        match self {
            Expr::Lit(n) => Some(*n),
            Expr::Unary(op, operand) => op.eval(operand.eval()?),
            Expr::Binary(lhs, op, rhs) => op.eval(lhs.eval()?, rhs.eval()?),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Neg,
    Plus,
    BitNot,
}

impl UnaryOp {
    fn eval(self, operand: i64) -> Option<i64> {
        match self {
            UnaryOp::Neg => operand.checked_neg(),
            UnaryOp::Plus => Some(operand),
            UnaryOp::BitNot => Some(!operand),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitXor,
    BitOr,
}

impl BinaryOp {
    fn eval(self, l: i64, r: i64) -> Option<i64> {
        match self {
            BinaryOp::Add => l.checked_add(r),
            BinaryOp::Sub => l.checked_sub(r),
            BinaryOp::Mul => l.checked_mul(r),
            BinaryOp::Div => l.checked_div(r),
            BinaryOp::Rem => l.checked_rem(r),
            BinaryOp::Shl => u32::try_from(r).ok().and_then(|s| l.checked_shl(s)),
            BinaryOp::Shr => u32::try_from(r).ok().and_then(|s| l.checked_shr(s)),
            BinaryOp::BitAnd => Some(l & r),
            BinaryOp::BitXor => Some(l ^ r),
            BinaryOp::BitOr => Some(l | r),
        }
    }
}

/// Evaluate a macro body as a self-contained literal expression.
///
/// A body made of a single quoted string evaluates to that string. Otherwise the
/// body must be an integer expression using `+ - * / % << >> & ^ | ~` and parentheses.
/// Division truncates toward zero; overflow and division by zero are errors.
/// Bodies nested deeper than [`MAX_NESTING`] levels are rejected as syntax errors.
pub fn evaluate(text: &str) -> Result<Value, ExprError> {
    if let Ok((_, s)) = all_consuming(lexeme(string_literal))(text).finish() {
        return Ok(Value::Str(s.to_string()));
    }

    if nesting_depth(text) > MAX_NESTING {
        return Err(ExprError::Syntax(text.trim().to_string()));
    }

    let (_, expr) = all_consuming(expression)(text)
        .finish()
        .map_err(|e| ExprError::Syntax(e.input.to_string()))?;

    expr.eval()
        .map(Value::Int)
        .ok_or_else(|| ExprError::Arithmetic(text.trim().to_string()))
}

/// Recursion depth the parser would need for `text`.
///
/// Every `(` and every unary operator adds a level; an operand or `)` drops back
/// to the level of the enclosing group.
fn nesting_depth(text: &str) -> usize {
    let mut groups: Vec<usize> = Vec::new();
    let mut depth = 0;
    let mut deepest = 0;
    let mut expect_operand = true;

    for c in text.chars().filter(|c| !c.is_whitespace()) {
        match c {
            '(' => {
                depth += 1;
                groups.push(depth);
                expect_operand = true;
            }
            ')' => {
                groups.pop();
                depth = groups.last().copied().unwrap_or(0);
                expect_operand = false;
            }
            '-' | '+' | '~' if expect_operand => depth += 1,
            c if c.is_ascii_alphanumeric() => {
                depth = groups.last().copied().unwrap_or(0);
                expect_operand = false;
            }
            _ => expect_operand = true,
        }
        deepest = deepest.max(depth);
    }
    deepest
}

/// Surround a parser with optional whitespace.
fn lexeme<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<'a, O>
where
    F: FnMut(&'a str) -> IResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn string_literal(input: &str) -> IResult<'_, &str> {
    alt((
        delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
        delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
    ))(input)
}

fn expression(input: &str) -> IResult<'_, Expr> {
    bit_or(input)
}

/// Parse a left-associative chain `operand (operator operand)*`.
fn binary_level<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<'a, Expr>,
    operator: fn(&'a str) -> IResult<'a, BinaryOp>,
) -> IResult<'a, Expr> {
    let (input, first) = operand(input)?;
    fold_many0(
        pair(lexeme(operator), operand),
        move || first.clone(),
        |lhs, (op, rhs)| Expr::Binary(Box::new(lhs), op, Box::new(rhs)),
    )(input)
}

fn bit_or(input: &str) -> IResult<'_, Expr> {
    binary_level(input, bit_xor, |i| value(BinaryOp::BitOr, char('|'))(i))
}

fn bit_xor(input: &str) -> IResult<'_, Expr> {
    binary_level(input, bit_and, |i| value(BinaryOp::BitXor, char('^'))(i))
}

fn bit_and(input: &str) -> IResult<'_, Expr> {
    binary_level(input, shift, |i| value(BinaryOp::BitAnd, char('&'))(i))
}

fn shift(input: &str) -> IResult<'_, Expr> {
    binary_level(input, sum, shift_operator)
}

fn sum(input: &str) -> IResult<'_, Expr> {
    binary_level(input, product, additive_operator)
}

fn product(input: &str) -> IResult<'_, Expr> {
    binary_level(input, unary, multiplicative_operator)
}

fn unary(input: &str) -> IResult<'_, Expr> {
    alt((
        map(pair(lexeme(unary_operator), unary), |(op, operand)| {
            Expr::Unary(op, Box::new(operand))
        }),
        primary,
    ))(input)
}

fn primary(input: &str) -> IResult<'_, Expr> {
    lexeme(alt((
        map(hex_literal, Expr::Lit),
        map(dec_literal, Expr::Lit),
        delimited(char('('), expression, char(')')),
    )))(input)
}

/// Parse an integer in base 16, prefixed by `0x`.
fn hex_literal(input: &str) -> IResult<'_, i64> {
    map_res(
        preceded(alt((tag("0x"), tag("0X"))), hex_digit1),
        |digits: &str| i64::from_str_radix(digits, 16),
    )(input)
}

/// Parse an integer in base 10.
fn dec_literal(input: &str) -> IResult<'_, i64> {
    map_res(digit1, |digits: &str| digits.parse::<i64>())(input)
}

fn unary_operator(input: &str) -> IResult<'_, UnaryOp> {
    alt((
        value(UnaryOp::Neg, char('-')),
        value(UnaryOp::Plus, char('+')),
        value(UnaryOp::BitNot, char('~')),
    ))(input)
}

fn shift_operator(input: &str) -> IResult<'_, BinaryOp> {
    alt((
        value(BinaryOp::Shl, tag("<<")),
        value(BinaryOp::Shr, tag(">>")),
    ))(input)
}

fn additive_operator(input: &str) -> IResult<'_, BinaryOp> {
    alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Sub, char('-')),
    ))(input)
}

fn multiplicative_operator(input: &str) -> IResult<'_, BinaryOp> {
    alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
        value(BinaryOp::Rem, char('%')),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(text: &str) -> i64 {
        match evaluate(text).unwrap() {
            Value::Int(n) => n,
            other => panic!("expected integer, got {:?}", other),
        }
    }

    #[test]
    fn test_literals() {
        assert_eq!(int("42"), 42);
        assert_eq!(int("0x1F"), 31);
        assert_eq!(int("0XfF"), 255);
        assert_eq!(int("  7  "), 7);
    }

    #[test]
    fn test_precedence_and_grouping() {
        assert_eq!(int("1 + 2 * 3"), 7);
        assert_eq!(int("(1 + 2) * 3"), 9);
        assert_eq!(int("10 - 4 - 3"), 3);
        assert_eq!(int("7 / 2"), 3);
        assert_eq!(int("-7 / 2"), -3);
        assert_eq!(int("1 - -2"), 3);
        assert_eq!(int("((2))"), 2);
    }

    #[test]
    fn test_bit_operators() {
        assert_eq!(int("(1 << 4)"), 16);
        assert_eq!(int("0x100 >> 4"), 16);
        assert_eq!(int("(1 << 2) | (1 << 0)"), 5);
        assert_eq!(int("0xff & 0x0f"), 15);
        assert_eq!(int("6 ^ 3"), 5);
        assert_eq!(int("~0"), -1);
        assert_eq!(int("1 + 2 << 1"), 6);
    }

    #[test]
    fn test_string_literals() {
        assert_eq!(evaluate("\"okay\"").unwrap(), Value::Str("okay".to_string()));
        assert_eq!(evaluate(" 'a' ").unwrap(), Value::Str("a".to_string()));
        assert_eq!(evaluate("\"\"").unwrap(), Value::Str(String::new()));
    }

    #[test]
    fn test_rejects_identifiers_and_suffixes() {
        assert!(matches!(evaluate("FOO + 1"), Err(ExprError::Syntax(_))));
        assert!(matches!(evaluate("1U"), Err(ExprError::Syntax(_))));
        assert!(matches!(evaluate("(1 + 2"), Err(ExprError::Syntax(_))));
        assert!(matches!(evaluate(""), Err(ExprError::Syntax(_))));
        assert!(matches!(evaluate("1 || 2"), Err(ExprError::Syntax(_))));
    }

    #[test]
    fn test_nesting_depth() {
        assert_eq!(nesting_depth("1 + 2"), 0);
        assert_eq!(nesting_depth("((1) + (2))"), 2);
        assert_eq!(nesting_depth("-(-1)"), 3);
        assert_eq!(nesting_depth("-1 + -1 + -1"), 1);
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let parens = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(evaluate(&parens), Err(ExprError::Syntax(_))));
        let negations = format!("{}1", "-".repeat(10_000));
        assert!(matches!(evaluate(&negations), Err(ExprError::Syntax(_))));

        let accepted = format!("{}7{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert_eq!(int(&accepted), 7);
    }

    #[test]
    fn test_arithmetic_errors() {
        assert!(matches!(evaluate("1 / 0"), Err(ExprError::Arithmetic(_))));
        assert!(matches!(evaluate("5 % 0"), Err(ExprError::Arithmetic(_))));
        assert!(matches!(evaluate("1 << 64"), Err(ExprError::Arithmetic(_))));
        assert!(matches!(
            evaluate("0x7fffffffffffffff + 1"),
            Err(ExprError::Arithmetic(_))
        ));
    }
}
