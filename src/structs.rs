use clap::Parser;
use std::path::PathBuf;
// --- Data Structures ---

/// One node of a best-parse tree over the inclusive token span `start..=end`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseNode {
    pub start: usize,
    pub end: usize,
    pub non_terminal: usize,
    pub rule: usize,
    pub split: Option<usize>,
    pub children: Vec<ParseNode>,
}

impl ParseNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseTree {
    pub probability: f64,
    pub root: ParseNode,
}

// --- Command Line ---

#[derive(Parser, Debug)]
#[command(name = "scfg_tool", about = "Stochastic context-free grammar parsing, training and sampling", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Print grammar diagnostics as JSON
    Info(InfoArgs),
    /// Best (CYK) parse of every corpus string
    Parse(CorpusArgs),
    /// Start-symbol inside probability of every corpus string
    Inside(CorpusArgs),
    /// Check rule probabilities at current and sampled parameter values
    Verify(VerifyArgs),
    /// Sample random strings from the grammar
    Generate(GenerateArgs),
    /// Fit rule-probability parameters to a corpus
    Train(TrainArgs),
}

#[derive(Parser, Debug)]
pub struct InfoArgs {
    #[arg()]
    pub grammar: PathBuf,
    /// Also load a corpus so its size appears in the report
    #[arg(long)]
    pub corpus: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct CorpusArgs {
    #[arg()]
    pub grammar: PathBuf,
    /// One string per line; read from stdin when omitted
    #[arg(long)]
    pub corpus: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct VerifyArgs {
    #[arg()]
    pub grammar: PathBuf,
    #[arg(long, default_value_t = 100)]
    pub samples: usize,
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct GenerateArgs {
    #[arg()]
    pub grammar: PathBuf,
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: usize,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long, default_value_t = 1000)]
    pub max_depth: usize,
    /// Non-terminal to expand instead of the start symbol
    #[arg(long)]
    pub from: Option<usize>,
}

#[derive(Parser, Debug)]
pub struct TrainArgs {
    #[arg()]
    pub grammar: PathBuf,
    #[arg(long)]
    pub corpus: PathBuf,
    #[arg(long, default_value_t = 50)]
    pub iterations: usize,
    #[arg(long, default_value_t = 1e-6)]
    pub tolerance: f64,
    /// Write the trained grammar here
    #[arg(long)]
    pub output: Option<PathBuf>,
}
