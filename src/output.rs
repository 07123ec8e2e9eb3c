use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::engine::Scfg;
use crate::grammar::Grammar;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
    pub used: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PruningSummary {
    pub can_start_with: usize,
    pub can_end_with: usize,
    pub has_precursor_starting_with: usize,
    pub has_follower_ending_with: usize,
}

/// Structured dump of a grammar (and, through [`Scfg::diagnostics`], its
/// corpus state) for host introspection.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Diagnostics {
    pub start_symbol: usize,
    pub non_terminals: usize,
    pub terminals: Vec<String>,
    pub terminal_rules: usize,
    pub binary_rules: usize,
    pub rules_per_non_terminal: Vec<usize>,
    pub rules: Vec<String>,
    pub parameters: Vec<ParameterInfo>,
    pub pruning: PruningSummary,
    pub corpus_strings: usize,
    pub inside_calls: u64,
    pub outside_calls: u64,
}

impl Diagnostics {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Grammar {
    pub fn diagnostics(&self) -> Diagnostics {
        let terminal_rules = (0..self.nt_count())
            .map(|nt| self.rules_by_lhs_terminal(nt).len())
            .sum();
        let used = self.used_parameters();
        let pruning = self.pruning();

        Diagnostics {
            start_symbol: self.start(),
            non_terminals: self.nt_count(),
            terminals: self.terminals().to_vec(),
            terminal_rules,
            binary_rules: self.rules().len() - terminal_rules,
            rules_per_non_terminal: (0..self.nt_count())
                .map(|nt| self.rules_by_lhs_terminal(nt).len() + self.rules_by_lhs_binary(nt).len())
                .collect(),
            rules: (0..self.rules().len()).map(|i| self.rule_string(i)).collect(),
            parameters: self
                .parameters()
                .iter()
                .map(|(id, p)| ParameterInfo {
                    name: p.name.clone(),
                    value: p.value,
                    lower: p.lower,
                    upper: p.upper,
                    used: used.contains(&id),
                })
                .collect(),
            pruning: PruningSummary {
                can_start_with: pruning.can_start_with.count_ones(),
                can_end_with: pruning.can_end_with.count_ones(),
                has_precursor_starting_with: pruning.has_precursor_starting_with.count_ones(),
                has_follower_ending_with: pruning.has_follower_ending_with.count_ones(),
            },
            corpus_strings: 0,
            inside_calls: 0,
            outside_calls: 0,
        }
    }

    /// Renders the grammar, with current parameter values, in the syntax
    /// `parse_grammar_text` reads.
    pub fn to_grammar_text(&self) -> String {
        let mut text = format!("start {}\n", self.start());
        for (_, p) in self.parameters().iter() {
            text.push_str(&format!(
                "param {} = {} in [{}, {}]\n",
                p.name, p.value, p.lower, p.upper
            ));
        }
        for index in 0..self.rules().len() {
            text.push_str(&self.rule_string(index));
            text.push('\n');
        }
        text
    }
}

impl Scfg {
    pub fn diagnostics(&self) -> Diagnostics {
        let counters = self.counters();
        Diagnostics {
            corpus_strings: self.corpus().len(),
            inside_calls: counters.inside,
            outside_calls: counters.outside,
            ..self.grammar().diagnostics()
        }
    }
}

// --- Output Writing---

pub fn write_grammar(grammar: &Grammar, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write!(writer, "{}", grammar.to_grammar_text())?;
    writer.flush()?;
    Ok(())
}
