//! Path expressions over predicate (field) names.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! alt     := seq ( "|" seq )*
//! seq     := postfix ( "," postfix )*
//! postfix := atom ( "+" | "*" | "{" n "}" | "{" n "," "}" | "{" n "," m "}" )*
//! atom    := name | "<" name | "(" alt ")"
//! name    := [A-Za-z_][A-Za-z0-9_]*
//! ```
//!
//! `p` follows `p` forward, `<p` follows it backwards. Parentheses only group;
//! they leave no trace in the AST.

use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::take_while,
    character::complete::{char as pchar, digit1, multispace0, satisfy},
    combinator::{all_consuming, map, map_res, opt, recognize},
    error::{Error as NomError, ErrorKind},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded},
    IResult,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema_doc::Name;

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PathExpr {
    Forward { predicate: Name },
    Reverse { predicate: Name },
    Seq { parts: Vec<PathExpr> },
    Alt { parts: Vec<PathExpr> },
    Plus { inner: Box<PathExpr> },
    Star { inner: Box<PathExpr> },
    /// `e{min,max}`; `max == None` is unbounded.
    Repeat {
        inner: Box<PathExpr>,
        min: u32,
        max: Option<u32>,
    },
}

impl PathExpr {
    pub fn forward(predicate: impl Into<Name>) -> Self {
        PathExpr::Forward {
            predicate: predicate.into(),
        }
    }

    pub fn reverse(predicate: impl Into<Name>) -> Self {
        PathExpr::Reverse {
            predicate: predicate.into(),
        }
    }

    pub fn seq(parts: Vec<PathExpr>) -> Self {
        mk_seq(parts)
    }

    pub fn alt(parts: Vec<PathExpr>) -> Self {
        mk_alt(parts)
    }

    pub fn plus(inner: PathExpr) -> Self {
        PathExpr::Plus {
            inner: Box::new(inner),
        }
    }

    pub fn star(inner: PathExpr) -> Self {
        PathExpr::Star {
            inner: Box::new(inner),
        }
    }

    /// Every predicate name mentioned by the expression, in first-use order.
    pub fn predicates(&self) -> Vec<&str> {
        fn walk<'a>(e: &'a PathExpr, out: &mut Vec<&'a str>) {
            match e {
                PathExpr::Forward { predicate } | PathExpr::Reverse { predicate } => {
                    if !out.contains(&predicate.as_str()) {
                        out.push(predicate);
                    }
                }
                PathExpr::Seq { parts } | PathExpr::Alt { parts } => {
                    parts.iter().for_each(|p| walk(p, out));
                }
                PathExpr::Plus { inner }
                | PathExpr::Star { inner }
                | PathExpr::Repeat { inner, .. } => walk(inner, out),
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(self))
    }
}

fn render(e: &PathExpr) -> String {
    match e {
        PathExpr::Forward { predicate } => predicate.clone(),
        PathExpr::Reverse { predicate } => format!("<{predicate}"),
        PathExpr::Seq { parts } => parts
            .iter()
            .map(|p| match p {
                PathExpr::Alt { .. } => format!("({})", render(p)),
                _ => render(p),
            })
            .collect::<Vec<_>>()
            .join(","),
        PathExpr::Alt { parts } => parts.iter().map(render).collect::<Vec<_>>().join("|"),
        PathExpr::Plus { inner } => format!("{}+", render_operand(inner)),
        PathExpr::Star { inner } => format!("{}*", render_operand(inner)),
        PathExpr::Repeat { inner, min, max } => {
            let bounds = match max {
                Some(m) if m == min => format!("{{{min}}}"),
                Some(m) => format!("{{{min},{m}}}"),
                None => format!("{{{min},}}"),
            };
            format!("{}{bounds}", render_operand(inner))
        }
    }
}

fn render_operand(e: &PathExpr) -> String {
    match e {
        PathExpr::Seq { .. } | PathExpr::Alt { .. } => format!("({})", render(e)),
        _ => render(e),
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("path syntax error at offset {offset} in `{expr}`: {message}")]
pub struct PathSyntaxError {
    pub expr: String,
    pub offset: usize,
    pub message: String,
}

impl PathSyntaxError {
    fn new(expr: &str, offset: usize, message: impl Into<String>) -> Self {
        Self {
            expr: expr.to_string(),
            offset,
            message: message.into(),
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

pub fn parse_path_expr(text: &str) -> Result<PathExpr, PathSyntaxError> {
    if text.trim().is_empty() {
        return Err(PathSyntaxError::new(text, 0, "empty path expression"));
    }
    check_parens(text)?;

    match all_consuming(ws(alt_expr))(text) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(syntax_error(text, e)),
        Err(nom::Err::Incomplete(_)) => Err(PathSyntaxError::new(
            text,
            text.len(),
            "unexpected end of expression",
        )),
    }
}

fn check_parens(text: &str) -> Result<(), PathSyntaxError> {
    let mut open: Vec<usize> = Vec::new();
    for (offset, c) in text.char_indices() {
        match c {
            '(' => open.push(offset),
            ')' => {
                if open.pop().is_none() {
                    return Err(PathSyntaxError::new(
                        text,
                        offset,
                        "unbalanced parentheses: unmatched `)`",
                    ));
                }
            }
            _ => {}
        }
    }
    match open.pop() {
        Some(offset) => Err(PathSyntaxError::new(
            text,
            offset,
            "unbalanced parentheses: unclosed `(`",
        )),
        None => Ok(()),
    }
}

fn syntax_error(text: &str, e: NomError<&str>) -> PathSyntaxError {
    let rest = e.input.trim_start();
    let offset = text.len() - rest.len();
    if e.code == ErrorKind::Verify {
        return PathSyntaxError::new(text, offset, "invalid repetition bounds");
    }
    let message = match rest.chars().next() {
        None => "empty atom at end of expression".to_string(),
        Some(c @ (',' | '|' | ')')) => format!("empty atom next to `{c}`"),
        Some('{') => "malformed repetition bounds".to_string(),
        Some(c @ ('+' | '*')) => format!("operator `{c}` has no operand"),
        Some('<') => "`<` must be followed by a predicate name".to_string(),
        Some(c) => format!("unknown operator or character `{c}`"),
    };
    PathSyntaxError::new(text, offset, message)
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn predicate_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn alt_expr(input: &str) -> IResult<&str, PathExpr> {
    map(separated_list1(ws(pchar('|')), seq_expr), mk_alt)(input)
}

fn seq_expr(input: &str) -> IResult<&str, PathExpr> {
    map(separated_list1(ws(pchar(',')), postfix_expr), mk_seq)(input)
}

#[derive(Debug, Clone, Copy)]
enum Postfix {
    Plus,
    Star,
    Repeat(u32, Option<u32>),
}

fn postfix_expr(input: &str) -> IResult<&str, PathExpr> {
    let (input, atom) = ws(atom)(input)?;
    let (input, ops) = many0(ws(postfix_op))(input)?;
    Ok((input, ops.into_iter().fold(atom, apply_postfix)))
}

fn postfix_op(input: &str) -> IResult<&str, Postfix> {
    alt((
        map(pchar('+'), |_| Postfix::Plus),
        map(pchar('*'), |_| Postfix::Star),
        repeat_bounds,
    ))(input)
}

fn repeat_bounds(input: &str) -> IResult<&str, Postfix> {
    let start = input;
    let (input, _) = pchar('{')(input)?;
    let (input, min) = ws(number)(input)?;
    let (input, upper) = opt(preceded(pchar(','), opt(ws(number))))(input)?;
    let (input, _) = pchar('}')(input)?;
    let max = match upper {
        None => Some(min),
        Some(None) => None,
        Some(Some(max)) => Some(max),
    };
    if matches!(max, Some(max) if max < min) {
        return Err(nom::Err::Failure(NomError::new(start, ErrorKind::Verify)));
    }
    Ok((input, Postfix::Repeat(min, max)))
}

fn number(input: &str) -> IResult<&str, u32> {
    map_res(digit1, str::parse::<u32>)(input)
}

fn atom(input: &str) -> IResult<&str, PathExpr> {
    alt((
        map(preceded(pchar('<'), ws(predicate_name)), PathExpr::reverse),
        map(predicate_name, PathExpr::forward),
        delimited(pchar('('), ws(alt_expr), pchar(')')),
    ))(input)
}

fn apply_postfix(inner: PathExpr, op: Postfix) -> PathExpr {
    match op {
        Postfix::Plus => PathExpr::plus(inner),
        Postfix::Star => PathExpr::star(inner),
        Postfix::Repeat(min, max) => PathExpr::Repeat {
            inner: Box::new(inner),
            min,
            max,
        },
    }
}

fn mk_seq(parts: Vec<PathExpr>) -> PathExpr {
    let mut out: Vec<PathExpr> = Vec::new();
    for p in parts {
        match p {
            PathExpr::Seq { parts: inner } => out.extend(inner),
            other => out.push(other),
        }
    }
    if out.len() == 1 {
        out.remove(0)
    } else {
        PathExpr::Seq { parts: out }
    }
}

fn mk_alt(parts: Vec<PathExpr>) -> PathExpr {
    let mut out: Vec<PathExpr> = Vec::new();
    for p in parts {
        match p {
            PathExpr::Alt { parts: inner } => out.extend(inner),
            other => out.push(other),
        }
    }
    if out.len() == 1 {
        out.remove(0)
    } else {
        PathExpr::Alt { parts: out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postfix_binds_tighter_than_sequence() {
        let e = parse_path_expr("friend,cat+").unwrap();
        assert_eq!(
            e,
            PathExpr::seq(vec![
                PathExpr::forward("friend"),
                PathExpr::plus(PathExpr::forward("cat")),
            ])
        );
    }

    #[test]
    fn reverse_star_then_forward() {
        let e = parse_path_expr("(<friend)*,cat").unwrap();
        assert_eq!(
            e,
            PathExpr::seq(vec![
                PathExpr::star(PathExpr::reverse("friend")),
                PathExpr::forward("cat"),
            ])
        );
        assert_eq!(e.to_string(), "<friend*,cat");
    }

    #[test]
    fn grouping_flattens() {
        let e = parse_path_expr("(a,b),c").unwrap();
        assert_eq!(
            e,
            PathExpr::seq(vec![
                PathExpr::forward("a"),
                PathExpr::forward("b"),
                PathExpr::forward("c"),
            ])
        );
    }

    #[test]
    fn alternation_is_lowest() {
        let e = parse_path_expr(" a , b | c ").unwrap();
        assert_eq!(
            e,
            PathExpr::alt(vec![
                PathExpr::seq(vec![PathExpr::forward("a"), PathExpr::forward("b")]),
                PathExpr::forward("c"),
            ])
        );
    }

    #[test]
    fn repetition_bounds() {
        assert_eq!(
            parse_path_expr("p{2,}").unwrap(),
            PathExpr::Repeat {
                inner: Box::new(PathExpr::forward("p")),
                min: 2,
                max: None,
            }
        );
        assert_eq!(parse_path_expr("p{1,3}").unwrap().to_string(), "p{1,3}");
        assert_eq!(parse_path_expr("p{2}").unwrap().to_string(), "p{2}");
        let err = parse_path_expr("p{3,1}").unwrap_err();
        assert_eq!(err.message, "invalid repetition bounds");
    }

    #[test]
    fn predicates_are_listed_once() {
        let e = parse_path_expr("(<friend)*,cat,friend").unwrap();
        assert_eq!(e.predicates(), vec!["friend", "cat"]);
    }
}
