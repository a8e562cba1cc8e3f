//! Page-number expressions of conditional gaps.
//!
//! A tiny expression language over the single variable `$pageNumber`:
//!
//! ```text
//! or       := and ( "||" and )*
//! and      := unary ( "&&" unary )*
//! unary    := "!" unary | compare
//! compare  := sum ( ("==" | "!=" | "<=" | ">=" | "<" | ">") sum )?
//! sum      := term ( ("+" | "-") term )*
//! term     := factor ( ("*" | "/" | "%") factor )*
//! factor   := integer | "true" | "false" | "$pageNumber" | "(" or ")" | "-" factor
//! ```

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, map_res, opt, value},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult,
};

use crate::error::{QueryError, QueryResult};

/// Binary operators of the gap expression language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Remainder,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// `&&`
    And,
    /// `||`
    Or,
}

/// Parsed gap expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GapExpression {
    /// Integer literal.
    Integer(i64),
    /// Boolean literal.
    Boolean(bool),
    /// The page number being evaluated.
    PageNumber,
    /// Logical negation.
    Not(Box<GapExpression>),
    /// Arithmetic negation.
    Negate(Box<GapExpression>),
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOperator,
        /// Left operand.
        left: Box<GapExpression>,
        /// Right operand.
        right: Box<GapExpression>,
    },
}

/// Value produced while evaluating an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapValue {
    /// Integer value.
    Int(i64),
    /// Boolean value.
    Bool(bool),
}

impl GapExpression {
    /// Parses an expression.
    pub fn parse(input: &str) -> QueryResult<GapExpression> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(QueryError::InvalidGapExpression {
                position: 0,
                message: "empty expression".to_string(),
            });
        }
        match all_consuming(delimited(ws, or_expression, ws))(trimmed) {
            Ok((_, expression)) => Ok(expression),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(QueryError::InvalidGapExpression {
                position: trimmed.len() - e.input.len(),
                message: format!("unexpected input at: '{}'", truncate(e.input, 20)),
            }),
            Err(nom::Err::Incomplete(_)) => Err(QueryError::InvalidGapExpression {
                position: trimmed.len(),
                message: "incomplete expression".to_string(),
            }),
        }
    }

    /// Evaluates the expression; `None` on type mismatch or division by zero.
    pub fn evaluate(&self, page_number: i64) -> Option<GapValue> {
        match self {
            GapExpression::Integer(v) => Some(GapValue::Int(*v)),
            GapExpression::Boolean(v) => Some(GapValue::Bool(*v)),
            GapExpression::PageNumber => Some(GapValue::Int(page_number)),
            GapExpression::Not(inner) => match inner.evaluate(page_number)? {
                GapValue::Bool(v) => Some(GapValue::Bool(!v)),
                GapValue::Int(_) => None,
            },
            GapExpression::Negate(inner) => match inner.evaluate(page_number)? {
                GapValue::Int(v) => v.checked_neg().map(GapValue::Int),
                GapValue::Bool(_) => None,
            },
            GapExpression::Binary { op, left, right } => evaluate_binary(*op, left, right, page_number),
        }
    }

    /// Returns true if the expression evaluates to `true` for the page.
    pub fn matches(&self, page_number: usize) -> bool {
        let page = i64::try_from(page_number).unwrap_or(i64::MAX);
        matches!(self.evaluate(page), Some(GapValue::Bool(true)))
    }
}

fn evaluate_binary(
    op: BinaryOperator,
    left: &GapExpression,
    right: &GapExpression,
    page_number: i64,
) -> Option<GapValue> {
    use BinaryOperator::*;

    match op {
        And => match left.evaluate(page_number)? {
            GapValue::Bool(false) => Some(GapValue::Bool(false)),
            GapValue::Bool(true) => match right.evaluate(page_number)? {
                GapValue::Bool(v) => Some(GapValue::Bool(v)),
                GapValue::Int(_) => None,
            },
            GapValue::Int(_) => None,
        },
        Or => match left.evaluate(page_number)? {
            GapValue::Bool(true) => Some(GapValue::Bool(true)),
            GapValue::Bool(false) => match right.evaluate(page_number)? {
                GapValue::Bool(v) => Some(GapValue::Bool(v)),
                GapValue::Int(_) => None,
            },
            GapValue::Int(_) => None,
        },
        _ => {
            let l = left.evaluate(page_number)?;
            let r = right.evaluate(page_number)?;
            match (l, r) {
                (GapValue::Int(a), GapValue::Int(b)) => match op {
                    Add => a.checked_add(b).map(GapValue::Int),
                    Subtract => a.checked_sub(b).map(GapValue::Int),
                    Multiply => a.checked_mul(b).map(GapValue::Int),
                    Divide => a.checked_div(b).map(GapValue::Int),
                    Remainder => a.checked_rem(b).map(GapValue::Int),
                    Equal => Some(GapValue::Bool(a == b)),
                    NotEqual => Some(GapValue::Bool(a != b)),
                    Less => Some(GapValue::Bool(a < b)),
                    LessOrEqual => Some(GapValue::Bool(a <= b)),
                    Greater => Some(GapValue::Bool(a > b)),
                    GreaterOrEqual => Some(GapValue::Bool(a >= b)),
                    And | Or => None,
                },
                (GapValue::Bool(a), GapValue::Bool(b)) => match op {
                    Equal => Some(GapValue::Bool(a == b)),
                    NotEqual => Some(GapValue::Bool(a != b)),
                    _ => None,
                },
                _ => None,
            }
        }
    }
}

fn truncate(s: &str, max_len: usize) -> &str {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn fold(first: GapExpression, rest: Vec<(BinaryOperator, GapExpression)>) -> GapExpression {
    rest.into_iter().fold(first, |left, (op, right)| GapExpression::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

// ============================================================================
// Grammar
// ============================================================================

fn or_expression(input: &str) -> IResult<&str, GapExpression> {
    let (input, first) = and_expression(input)?;
    let (input, rest) = many0(pair(
        value(BinaryOperator::Or, delimited(ws, tag("||"), ws)),
        and_expression,
    ))(input)?;
    Ok((input, fold(first, rest)))
}

fn and_expression(input: &str) -> IResult<&str, GapExpression> {
    let (input, first) = unary(input)?;
    let (input, rest) = many0(pair(
        value(BinaryOperator::And, delimited(ws, tag("&&"), ws)),
        unary,
    ))(input)?;
    Ok((input, fold(first, rest)))
}

fn unary(input: &str) -> IResult<&str, GapExpression> {
    alt((
        map(preceded(pair(char('!'), ws), unary), |e| GapExpression::Not(Box::new(e))),
        comparison,
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, GapExpression> {
    let (input, left) = sum(input)?;
    let (input, right) = opt(pair(delimited(ws, comparison_operator, ws), sum))(input)?;
    Ok((input, fold(left, right.into_iter().collect())))
}

fn comparison_operator(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        value(BinaryOperator::Equal, tag("==")),
        value(BinaryOperator::NotEqual, tag("!=")),
        value(BinaryOperator::LessOrEqual, tag("<=")),
        value(BinaryOperator::GreaterOrEqual, tag(">=")),
        value(BinaryOperator::Less, tag("<")),
        value(BinaryOperator::Greater, tag(">")),
    ))(input)
}

fn sum(input: &str) -> IResult<&str, GapExpression> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(
        delimited(
            ws,
            alt((
                value(BinaryOperator::Add, char('+')),
                value(BinaryOperator::Subtract, char('-')),
            )),
            ws,
        ),
        term,
    ))(input)?;
    Ok((input, fold(first, rest)))
}

fn term(input: &str) -> IResult<&str, GapExpression> {
    let (input, first) = factor(input)?;
    let (input, rest) = many0(pair(
        delimited(
            ws,
            alt((
                value(BinaryOperator::Multiply, char('*')),
                value(BinaryOperator::Divide, char('/')),
                value(BinaryOperator::Remainder, char('%')),
            )),
            ws,
        ),
        factor,
    ))(input)?;
    Ok((input, fold(first, rest)))
}

fn factor(input: &str) -> IResult<&str, GapExpression> {
    alt((
        map_res(digit1, |digits: &str| digits.parse::<i64>().map(GapExpression::Integer)),
        value(GapExpression::PageNumber, tag("$pageNumber")),
        value(GapExpression::Boolean(true), tag("true")),
        value(GapExpression::Boolean(false), tag("false")),
        delimited(pair(char('('), ws), or_expression, pair(ws, char(')'))),
        map(preceded(pair(char('-'), ws), factor), |e| GapExpression::Negate(Box::new(e))),
    ))(input)
}

/// Optional whitespace
fn ws(input: &str) -> IResult<&str, &str> {
    multispace0(input)
}
