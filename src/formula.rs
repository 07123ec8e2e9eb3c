use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, multispace0, one_of},
    combinator::{all_consuming, map, recognize},
    multi::many0,
    number::complete::double,
    sequence::{delimited, pair, preceded},
    IResult,
};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Result, ScfgError};
use crate::parameters::Parameters;

/// Arithmetic expression giving a rule's production probability.
#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    Constant(f64),
    Parameter(String),
    Negate(Box<Formula>),
    Binary {
        op: BinaryOp,
        lhs: Box<Formula>,
        rhs: Box<Formula>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
        }
    }
}

impl Formula {
    /// Parses `text`; the error string describes what went wrong.
    pub fn parse(text: &str) -> std::result::Result<Formula, String> {
        match all_consuming(delimited(multispace0, expression, multispace0))(text) {
            Ok((_, formula)) => Ok(formula),
            Err(e) => Err(format!("malformed formula '{}': {}", text.trim(), e)),
        }
    }

    /// Names of every parameter the formula reads.
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        match self {
            Formula::Constant(_) => {}
            Formula::Parameter(name) => {
                names.insert(name.as_str());
            }
            Formula::Negate(inner) => inner.collect_variables(names),
            Formula::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(names);
                rhs.collect_variables(names);
            }
        }
    }

    pub fn evaluate(&self, params: &Parameters) -> Result<f64> {
        Ok(match self {
            Formula::Constant(v) => *v,
            Formula::Parameter(name) => params.value_of(name).ok_or_else(|| {
                ScfgError::ParameterUpdate(format!("unknown parameter '{}'", name))
            })?,
            Formula::Negate(inner) => -inner.evaluate(params)?,
            Formula::Binary { op, lhs, rhs } => {
                let (a, b) = (lhs.evaluate(params)?, rhs.evaluate(params)?);
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                }
            }
        })
    }

    fn fmt_with_precedence(&self, f: &mut fmt::Formatter<'_>, parent: u8, right: bool) -> fmt::Result {
        match self {
            Formula::Constant(v) => write!(f, "{}", v),
            Formula::Parameter(name) => write!(f, "{}", name),
            Formula::Negate(inner) => {
                write!(f, "-")?;
                inner.fmt_with_precedence(f, 3, false)
            }
            Formula::Binary { op, lhs, rhs } => {
                let own = op.precedence();
                // Left-associative: a right operand of equal precedence needs brackets.
                let bracket = own < parent || (right && own == parent);
                if bracket {
                    write!(f, "(")?;
                }
                lhs.fmt_with_precedence(f, own, false)?;
                write!(f, " {} ", op.symbol())?;
                rhs.fmt_with_precedence(f, own, true)?;
                if bracket {
                    write!(f, ")")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with_precedence(f, 0, false)
    }
}

// --- Parsing ---

pub(crate) fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_"), tag(".")))),
    ))(input)
}

fn expression(input: &str) -> IResult<&str, Formula> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(delimited(multispace0, one_of("+-"), multispace0), term))(input)?;
    Ok((input, fold(first, rest)))
}

fn term(input: &str) -> IResult<&str, Formula> {
    let (input, first) = factor(input)?;
    let (input, rest) = many0(pair(delimited(multispace0, one_of("*/"), multispace0), factor))(input)?;
    Ok((input, fold(first, rest)))
}

fn factor(input: &str) -> IResult<&str, Formula> {
    alt((
        map(preceded(pair(char('-'), multispace0), factor), |inner| {
            Formula::Negate(Box::new(inner))
        }),
        atom,
    ))(input)
}

fn atom(input: &str) -> IResult<&str, Formula> {
    alt((
        map(identifier, |name: &str| Formula::Parameter(name.to_string())),
        map(double, Formula::Constant),
        delimited(
            pair(char('('), multispace0),
            expression,
            pair(multispace0, char(')')),
        ),
    ))(input)
}

fn fold(first: Formula, rest: Vec<(char, Formula)>) -> Formula {
    rest.into_iter().fold(first, |lhs, (symbol, rhs)| {
        let op = match symbol {
            '+' => BinaryOp::Add,
            '-' => BinaryOp::Sub,
            '*' => BinaryOp::Mul,
            _ => BinaryOp::Div,
        };
        Formula::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    })
}
