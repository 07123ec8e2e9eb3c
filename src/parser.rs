use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag},
    character::complete::{char, digit1, none_of, space0, space1},
    combinator::{all_consuming, map, map_res, opt, recognize, rest, value},
    number::complete::double,
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use std::fs;
use std::io::BufRead;
use std::path::Path;

use crate::error::{Result, ScfgError};
use crate::formula::identifier;
use crate::grammar::{BinaryRuleSpec, Grammar, GrammarSpec, TerminalRuleSpec};

// --- Grammar File Parsing ---

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Start(i64),
    Param {
        name: String,
        value: f64,
        bounds: Option<(f64, f64)>,
    },
    Terminal(TerminalRuleSpec),
    Binary(BinaryRuleSpec),
}

/// Parses the line-oriented grammar format into a rule specification.
pub fn parse_grammar_text(text: &str) -> Result<GrammarSpec> {
    let mut spec = GrammarSpec::default();
    let mut start_line: Option<usize> = None;

    for (line_num, raw) in text.lines().enumerate() {
        let line_num = line_num + 1;
        let content = strip_comment(raw).trim();
        if content.is_empty() {
            continue;
        }

        let parsed = all_consuming(terminated(grammar_line, space0))(content)
            .map(|(_, line)| line)
            .map_err(|_| ScfgError::Syntax {
                line: line_num,
                message: format!("cannot parse '{}'", content),
            })?;

        match parsed {
            Line::Start(start) => {
                if let Some(previous) = start_line {
                    return Err(ScfgError::Syntax {
                        line: line_num,
                        message: format!("start symbol already declared on line {}", previous),
                    });
                }
                start_line = Some(line_num);
                spec.start = start;
            }
            Line::Param { name, value, bounds } => {
                let (lower, upper) = bounds.unwrap_or((0.0, 1.0));
                spec.parameters
                    .add(&name, value, lower, upper)
                    .map_err(|e| ScfgError::Syntax {
                        line: line_num,
                        message: e.to_string(),
                    })?;
            }
            Line::Terminal(rule) => spec.terminal_rules.push(rule),
            Line::Binary(rule) => spec.binary_rules.push(rule),
        }
    }

    Ok(spec)
}

pub fn load_grammar(path: &Path) -> Result<Grammar> {
    let text = fs::read_to_string(path)?;
    Grammar::from_spec(parse_grammar_text(&text)?)
}

/// One corpus string per non-empty line.
pub fn read_corpus<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut corpus = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            corpus.push(line.to_string());
        }
    }
    Ok(corpus)
}

pub fn load_corpus(path: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(path)?;
    read_corpus(std::io::BufReader::new(file))
}

/// Cuts a `#` comment, ignoring `#` inside quoted literals.
fn strip_comment(line: &str) -> &str {
    let mut in_literal = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_literal => escaped = true,
            '"' => in_literal = !in_literal,
            '#' if !in_literal => return &line[..i],
            _ => {}
        }
    }
    line
}

fn grammar_line(input: &str) -> IResult<&str, Line> {
    alt((start_line, param_line, rule_line))(input)
}

fn integer(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>)(input)
}

fn literal(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                none_of("\\\""),
                '\\',
                alt((value("\\", tag("\\")), value("\"", tag("\"")))),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

fn start_line(input: &str) -> IResult<&str, Line> {
    map(preceded(pair(tag("start"), space1), integer), Line::Start)(input)
}

fn bounds(input: &str) -> IResult<&str, (f64, f64)> {
    preceded(
        tuple((space1, tag("in"), space0, char('['), space0)),
        terminated(
            separated_pair(double, tuple((space0, char(','), space0)), double),
            pair(space0, char(']')),
        ),
    )(input)
}

fn param_line(input: &str) -> IResult<&str, Line> {
    map(
        tuple((
            preceded(pair(tag("param"), space1), identifier),
            preceded(tuple((space0, char('='), space0)), double),
            opt(bounds),
        )),
        |(name, value, bounds)| Line::Param {
            name: name.to_string(),
            value,
            bounds,
        },
    )(input)
}

enum Rhs {
    Terminal(String),
    Binary(i64, i64),
}

fn rule_line(input: &str) -> IResult<&str, Line> {
    let (input, lhs) = integer(input)?;
    let (input, _) = tuple((space0, tag("->"), space0))(input)?;
    let (input, rhs) = alt((
        map(literal, Rhs::Terminal),
        map(separated_pair(integer, space1, integer), |(a, b)| Rhs::Binary(a, b)),
    ))(input)?;
    let (input, probability) = opt(preceded(tuple((space0, char(':'), space0)), rest))(input)?;
    let probability = probability
        .map(|text: &str| text.trim().to_string())
        .filter(|text| !text.is_empty());

    let line = match rhs {
        Rhs::Terminal(terminal) => Line::Terminal(TerminalRuleSpec {
            lhs,
            terminal,
            probability,
        }),
        Rhs::Binary(rhs1, rhs2) => Line::Binary(BinaryRuleSpec {
            lhs,
            rhs1,
            rhs2,
            probability,
        }),
    };
    Ok((input, line))
}
