use std::io;
use thiserror::Error;

/// Every failure the grammar engine can report.
///
/// Construction and corpus errors abort the operation that raised them.
/// `ProbabilityConsistency` is expected while exploring parameter space and
/// is caught by the training and sampling drivers.
#[derive(Error, Debug)]
pub enum ScfgError {
    #[error("grammar definition error in {rule}: {reason}")]
    GrammarDefinition { rule: String, reason: String },

    #[error("grammar consistency error for non-terminal {non_terminal}: {reason}")]
    GrammarConsistency { non_terminal: usize, reason: String },

    #[error("cannot tokenize {input:?} at character {position}")]
    Tokenization { input: String, position: usize },

    #[error("probability consistency error for {subject}: {reason}")]
    ProbabilityConsistency { subject: String, reason: String },

    #[error("corpus string {string_index} has zero probability under the grammar")]
    ParseFailure { string_index: usize },

    #[error("random derivation exceeded the maximum depth of {max_depth}")]
    DerivationDepthExceeded { max_depth: usize },

    #[error("corpus string index {index} out of range (corpus has {len} strings)")]
    CorpusIndex { index: usize, len: usize },

    #[error("span [{start}, {end}] / non-terminal {non_terminal} is outside string {string_index}")]
    SpanOutOfRange {
        start: usize,
        end: usize,
        non_terminal: usize,
        string_index: usize,
    },

    #[error("non-terminal {non_terminal} is not defined (grammar has {nt_count})")]
    UnknownNonTerminal { non_terminal: usize, nt_count: usize },

    #[error("invalid parameter update: {0}")]
    ParameterUpdate(String),

    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ScfgError {
    pub(crate) fn definition(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        ScfgError::GrammarDefinition {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn consistency(non_terminal: usize, reason: impl Into<String>) -> Self {
        ScfgError::GrammarConsistency {
            non_terminal,
            reason: reason.into(),
        }
    }

    pub(crate) fn probability(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        ScfgError::ProbabilityConsistency {
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScfgError>;
