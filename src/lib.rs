//! Stochastic context-free grammars in Chomsky normal form: validation,
//! tokenization, inside/outside probabilities, best-parse search, training
//! of parametric rule probabilities and random generation.

pub mod chart;
pub mod cyk;
pub mod engine;
pub mod error;
pub mod formula;
pub mod generate;
pub mod grammar;
pub mod optimize;
pub mod output;
pub mod parameters;
pub mod parser;
pub mod probabilities;
pub mod structs;
pub mod training;
pub mod trie;

pub use engine::{CorpusString, Scfg};
pub use error::{Result, ScfgError};
pub use grammar::{BinaryRuleSpec, Grammar, GrammarSpec, TerminalRuleSpec};
pub use optimize::{CoordinateAscent, Optimizable, OptimizationReport};
pub use parameters::{ParamId, Parameters};
pub use structs::{ParseNode, ParseTree};
