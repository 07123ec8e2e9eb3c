use fixedbitset::FixedBitSet;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

use crate::error::{Result, ScfgError};
use crate::formula::Formula;
use crate::parameters::{ParamId, Parameters};
use crate::probabilities::{ProbabilityStore, RuleProbability};
use crate::trie::{Insertion, TerminalTrie};

// --- Grammar Specification ---

/// `LHS -> "terminal"` as it arrives from a grammar file or caller.
/// Indices are signed so that negative values reach validation.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalRuleSpec {
    pub lhs: i64,
    pub terminal: String,
    pub probability: Option<String>,
}

/// `LHS -> RHS1 RHS2`
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryRuleSpec {
    pub lhs: i64,
    pub rhs1: i64,
    pub rhs2: i64,
    pub probability: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GrammarSpec {
    pub terminal_rules: Vec<TerminalRuleSpec>,
    pub binary_rules: Vec<BinaryRuleSpec>,
    pub start: i64,
    pub parameters: Parameters,
}

// --- Grammar Structures ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Production {
    Terminal { terminal: usize },
    Binary { rhs1: usize, rhs2: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rule {
    pub lhs: usize,
    pub production: Production,
}

/// Non-terminal x terminal boolean matrix stored as one flat bitset.
#[derive(Debug, Clone)]
pub struct NtTerminalMatrix {
    terminal_count: usize,
    bits: FixedBitSet,
}

impl NtTerminalMatrix {
    fn new(nt_count: usize, terminal_count: usize) -> Self {
        Self {
            terminal_count,
            bits: FixedBitSet::with_capacity(nt_count * terminal_count),
        }
    }

    #[inline]
    pub fn get(&self, nt: usize, terminal: usize) -> bool {
        terminal < self.terminal_count && self.bits.contains(nt * self.terminal_count + terminal)
    }

    fn set(&mut self, nt: usize, terminal: usize) -> bool {
        let bit = nt * self.terminal_count + terminal;
        let was_set = self.bits.contains(bit);
        self.bits.insert(bit);
        !was_set
    }

    /// row `dst` |= row `src` of `other`; reports whether anything changed.
    fn absorb_row(&mut self, dst: usize, other: &NtTerminalMatrix, src: usize) -> bool {
        let mut changed = false;
        for terminal in 0..self.terminal_count {
            if other.get(src, terminal) {
                changed |= self.set(dst, terminal);
            }
        }
        changed
    }

    fn absorb_own_row(&mut self, dst: usize, src: usize) -> bool {
        if dst == src {
            return false;
        }
        let row: Vec<usize> = (0..self.terminal_count)
            .filter(|&terminal| self.get(src, terminal))
            .collect();
        let mut changed = false;
        for terminal in row {
            changed |= self.set(dst, terminal);
        }
        changed
    }

    pub fn count_ones(&self) -> usize {
        self.bits.count_ones(..)
    }
}

/// Tables used to discard `(start, end, non-terminal)` triples that no
/// derivation can reach.
#[derive(Debug, Clone)]
pub struct PruningTables {
    /// `nt =>* t ...`
    pub can_start_with: NtTerminalMatrix,
    /// `nt =>* ... t`
    pub can_end_with: NtTerminalMatrix,
    /// `start =>* ... t nt ...`
    pub has_precursor_starting_with: NtTerminalMatrix,
    /// `start =>* ... nt t ...`
    pub has_follower_ending_with: NtTerminalMatrix,
}

#[derive(Debug, Clone)]
pub struct Grammar {
    terminals: Vec<String>,
    trie: TerminalTrie,
    rules: Vec<Rule>,
    start: usize,
    nt_count: usize,
    rules_by_lhs_binary: Vec<Vec<usize>>,
    rules_by_lhs_terminal: Vec<Vec<usize>>,
    rules_by_rhs1: Vec<Vec<usize>>,
    rules_by_rhs2: Vec<Vec<usize>>,
    terminal_rule_map: Vec<Option<usize>>,
    pruning: PruningTables,
    probabilities: ProbabilityStore,
    used_parameters: Vec<ParamId>,
}

impl Grammar {
    pub fn from_spec(spec: GrammarSpec) -> Result<Grammar> {
        Grammar::new(
            &spec.terminal_rules,
            &spec.binary_rules,
            spec.start,
            spec.parameters,
        )
    }

    /// Builds and validates a grammar. Terminal rules take rule indices
    /// `0..terminal_rules.len()`, binary rules follow in their given order.
    pub fn new(
        terminal_rules: &[TerminalRuleSpec],
        binary_rules: &[BinaryRuleSpec],
        start: i64,
        parameters: Parameters,
    ) -> Result<Grammar> {
        if terminal_rules.is_empty() {
            return Err(ScfgError::definition(
                "grammar",
                "at least one terminal rule is required",
            ));
        }
        let start = non_terminal_index(start, "start symbol")?;

        // (1) field validation
        let mut sources = Vec::with_capacity(terminal_rules.len() + binary_rules.len());
        let mut used_names: HashSet<String> = HashSet::new();
        let mut max_nt = start;

        for (i, spec) in terminal_rules.iter().enumerate() {
            let label = format!("terminal rule {} ({} -> {:?})", i, spec.lhs, spec.terminal);
            let lhs = non_terminal_index(spec.lhs, &label)?;
            max_nt = max_nt.max(lhs);
            if spec.terminal.is_empty() {
                return Err(ScfgError::definition(label, "terminal literal is empty"));
            }
            sources.push(compile_probability(&spec.probability, &parameters, &label, &mut used_names)?);
        }
        for (i, spec) in binary_rules.iter().enumerate() {
            let label = format!(
                "binary rule {} ({} -> {} {})",
                i, spec.lhs, spec.rhs1, spec.rhs2
            );
            for value in [spec.lhs, spec.rhs1, spec.rhs2] {
                max_nt = max_nt.max(non_terminal_index(value, &label)?);
            }
            sources.push(compile_probability(&spec.probability, &parameters, &label, &mut used_names)?);
        }
        let nt_count = max_nt + 1;

        // (2) terminal alphabet
        let mut trie = TerminalTrie::new();
        let mut terminals = Vec::new();
        let mut rules = Vec::with_capacity(sources.len());
        let mut seen_rules: HashSet<Rule> = HashSet::new();

        for (i, spec) in terminal_rules.iter().enumerate() {
            let label = format!("terminal rule {} ({} -> {:?})", i, spec.lhs, spec.terminal);
            let terminal = match trie.insert(&spec.terminal) {
                Ok(Insertion::Added(index)) => {
                    terminals.push(spec.terminal.clone());
                    index
                }
                Ok(Insertion::Existing(index)) => index,
                Err(reason) => return Err(ScfgError::definition(label, reason)),
            };
            let rule = Rule {
                lhs: spec.lhs as usize,
                production: Production::Terminal { terminal },
            };
            if !seen_rules.insert(rule) {
                return Err(ScfgError::definition(label, "duplicate rule"));
            }
            rules.push(rule);
        }
        for (i, spec) in binary_rules.iter().enumerate() {
            let rule = Rule {
                lhs: spec.lhs as usize,
                production: Production::Binary {
                    rhs1: spec.rhs1 as usize,
                    rhs2: spec.rhs2 as usize,
                },
            };
            if !seen_rules.insert(rule) {
                return Err(ScfgError::definition(
                    format!("binary rule {} ({} -> {} {})", i, spec.lhs, spec.rhs1, spec.rhs2),
                    "duplicate rule",
                ));
            }
            rules.push(rule);
        }

        // (3) rule indices
        let terminal_count = terminals.len();
        let mut rules_by_lhs_binary = vec![Vec::new(); nt_count];
        let mut rules_by_lhs_terminal = vec![Vec::new(); nt_count];
        let mut rules_by_rhs1 = vec![Vec::new(); nt_count];
        let mut rules_by_rhs2 = vec![Vec::new(); nt_count];
        let mut terminal_rule_map = vec![None; nt_count * terminal_count];

        for (index, rule) in rules.iter().enumerate() {
            match rule.production {
                Production::Terminal { terminal } => {
                    rules_by_lhs_terminal[rule.lhs].push(index);
                    terminal_rule_map[rule.lhs * terminal_count + terminal] = Some(index);
                }
                Production::Binary { rhs1, rhs2 } => {
                    rules_by_lhs_binary[rule.lhs].push(index);
                    rules_by_rhs1[rhs1].push(index);
                    rules_by_rhs2[rhs2].push(index);
                }
            }
        }

        // (4) consistency
        for nt in 0..nt_count {
            if rules_by_lhs_binary[nt].is_empty() && rules_by_lhs_terminal[nt].is_empty() {
                return Err(ScfgError::consistency(nt, "has no production rules"));
            }
        }
        let reachable = reachable_from(start, &rules, &rules_by_lhs_binary);
        if let Some(nt) = (0..nt_count).find(|nt| !reachable[*nt]) {
            return Err(ScfgError::consistency(
                nt,
                format!("is not reachable from start symbol {}", start),
            ));
        }
        for nt in unproductive(nt_count, &rules, &rules_by_lhs_binary, &rules_by_lhs_terminal) {
            warn!(non_terminal = nt, "non-terminal cannot derive any finite string");
        }

        // (5) pruning tables
        let pruning = build_pruning_tables(nt_count, terminal_count, &rules);

        let probabilities = ProbabilityStore::new(parameters, sources)?;
        let mut used_parameters: Vec<ParamId> = used_names
            .iter()
            .filter_map(|name| probabilities.parameters().id(name))
            .collect();
        used_parameters.sort();

        debug!(
            non_terminals = nt_count,
            terminals = terminal_count,
            rules = rules.len(),
            parameters = used_parameters.len(),
            "grammar constructed"
        );

        Ok(Grammar {
            terminals,
            trie,
            rules,
            start,
            nt_count,
            rules_by_lhs_binary,
            rules_by_lhs_terminal,
            rules_by_rhs1,
            rules_by_rhs2,
            terminal_rule_map,
            pruning,
            probabilities,
            used_parameters,
        })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn nt_count(&self) -> usize {
        self.nt_count
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    pub fn terminals(&self) -> &[String] {
        &self.terminals
    }

    pub fn terminal(&self, index: usize) -> Option<&str> {
        self.terminals.get(index).map(String::as_str)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index)
    }

    #[inline]
    pub(crate) fn lhs(&self, rule: usize) -> usize {
        self.rules[rule].lhs
    }

    #[inline]
    pub(crate) fn production(&self, rule: usize) -> Production {
        self.rules[rule].production
    }

    pub fn rules_by_lhs_binary(&self, nt: usize) -> &[usize] {
        &self.rules_by_lhs_binary[nt]
    }

    pub fn rules_by_lhs_terminal(&self, nt: usize) -> &[usize] {
        &self.rules_by_lhs_terminal[nt]
    }

    pub fn rules_by_rhs1(&self, nt: usize) -> &[usize] {
        &self.rules_by_rhs1[nt]
    }

    pub fn rules_by_rhs2(&self, nt: usize) -> &[usize] {
        &self.rules_by_rhs2[nt]
    }

    /// Every rule with `nt` on the left, in declaration order.
    pub fn rules_by_lhs(&self, nt: usize) -> Vec<usize> {
        let mut all: Vec<usize> = self.rules_by_lhs_terminal[nt]
            .iter()
            .chain(self.rules_by_lhs_binary[nt].iter())
            .copied()
            .collect();
        all.sort_unstable();
        all
    }

    /// Index of the rule `nt -> terminal`, if there is one.
    #[inline]
    pub fn terminal_rule(&self, nt: usize, terminal: usize) -> Option<usize> {
        if nt >= self.nt_count || terminal >= self.terminals.len() {
            return None;
        }
        self.terminal_rule_map[nt * self.terminals.len() + terminal]
    }

    pub fn pruning(&self) -> &PruningTables {
        &self.pruning
    }

    pub fn tokenize(&self, input: &str) -> Result<Vec<usize>> {
        self.trie.tokenize(input)
    }

    /// Current production probability of `rule`.
    pub fn probability(&self, rule: usize) -> Option<f64> {
        self.probabilities.values().get(rule).copied()
    }

    /// Unchecked variant of [`Grammar::probability`] for evaluation loops.
    #[inline]
    pub(crate) fn value(&self, rule: usize) -> f64 {
        self.probabilities.probability(rule)
    }

    #[inline]
    pub(crate) fn is_deterministic(&self, rule: usize) -> bool {
        self.probabilities.is_deterministic(rule)
    }

    pub fn rule_probability(&self, rule: usize) -> Option<&RuleProbability> {
        self.probabilities.sources().get(rule)
    }

    pub fn probabilities(&self) -> &ProbabilityStore {
        &self.probabilities
    }

    pub fn parameters(&self) -> &Parameters {
        self.probabilities.parameters()
    }

    /// Parameters that occur in at least one rule formula.
    pub fn used_parameters(&self) -> &[ParamId] {
        &self.used_parameters
    }

    pub fn parameter_epoch(&self) -> u64 {
        self.probabilities.epoch()
    }

    pub fn set_parameter_values(&mut self, updates: &[(ParamId, f64)]) -> Result<()> {
        self.probabilities.set_parameter_values(updates)
    }

    /// `LHS -> "literal"` or `LHS -> RHS1 RHS2`, followed by `: formula`
    /// for parametric rules.
    pub fn rule_string(&self, index: usize) -> String {
        let rule = &self.rules[index];
        let body = match rule.production {
            Production::Terminal { terminal } => {
                format!("{} -> {}", rule.lhs, quote_literal(&self.terminals[terminal]))
            }
            Production::Binary { rhs1, rhs2 } => format!("{} -> {} {}", rule.lhs, rhs1, rhs2),
        };
        match self.probabilities.source(index) {
            RuleProbability::Deterministic => body,
            RuleProbability::Formula(formula) => format!("{} : {}", body, formula),
        }
    }
}

pub(crate) fn quote_literal(literal: &str) -> String {
    let mut quoted = String::with_capacity(literal.len() + 2);
    quoted.push('"');
    for ch in literal.chars() {
        if ch == '"' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

fn non_terminal_index(value: i64, label: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| {
        ScfgError::definition(label, format!("non-terminal index {} is negative", value))
    })
}

fn compile_probability(
    text: &Option<String>,
    parameters: &Parameters,
    label: &str,
    used_names: &mut HashSet<String>,
) -> Result<RuleProbability> {
    let Some(text) = text else {
        return Ok(RuleProbability::Deterministic);
    };
    if text.trim().is_empty() {
        return Ok(RuleProbability::Deterministic);
    }
    let formula = Formula::parse(text).map_err(|reason| ScfgError::definition(label, reason))?;
    for name in formula.variables() {
        if parameters.id(name).is_none() {
            return Err(ScfgError::definition(
                label,
                format!("unknown parameter '{}'", name),
            ));
        }
        used_names.insert(name.to_string());
    }
    Ok(RuleProbability::Formula(formula))
}

fn reachable_from(start: usize, rules: &[Rule], by_lhs_binary: &[Vec<usize>]) -> Vec<bool> {
    let mut reachable = vec![false; by_lhs_binary.len()];
    let mut queue = VecDeque::from([start]);
    reachable[start] = true;
    while let Some(nt) = queue.pop_front() {
        for &index in &by_lhs_binary[nt] {
            if let Production::Binary { rhs1, rhs2 } = rules[index].production {
                for child in [rhs1, rhs2] {
                    if !reachable[child] {
                        reachable[child] = true;
                        queue.push_back(child);
                    }
                }
            }
        }
    }
    reachable
}

fn unproductive(
    nt_count: usize,
    rules: &[Rule],
    by_lhs_binary: &[Vec<usize>],
    by_lhs_terminal: &[Vec<usize>],
) -> Vec<usize> {
    let mut productive: Vec<bool> = (0..nt_count).map(|nt| !by_lhs_terminal[nt].is_empty()).collect();
    let mut changed = true;
    while changed {
        changed = false;
        for nt in 0..nt_count {
            if productive[nt] {
                continue;
            }
            let derives = by_lhs_binary[nt].iter().any(|&index| match rules[index].production {
                Production::Binary { rhs1, rhs2 } => productive[rhs1] && productive[rhs2],
                Production::Terminal { .. } => true,
            });
            if derives {
                productive[nt] = true;
                changed = true;
            }
        }
    }
    (0..nt_count).filter(|nt| !productive[*nt]).collect()
}

fn build_pruning_tables(nt_count: usize, terminal_count: usize, rules: &[Rule]) -> PruningTables {
    let mut first = NtTerminalMatrix::new(nt_count, terminal_count);
    let mut last = NtTerminalMatrix::new(nt_count, terminal_count);

    for rule in rules {
        if let Production::Terminal { terminal } = rule.production {
            first.set(rule.lhs, terminal);
            last.set(rule.lhs, terminal);
        }
    }

    let binary: Vec<(usize, usize, usize)> = rules
        .iter()
        .filter_map(|rule| match rule.production {
            Production::Binary { rhs1, rhs2 } => Some((rule.lhs, rhs1, rhs2)),
            Production::Terminal { .. } => None,
        })
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        for &(lhs, rhs1, rhs2) in &binary {
            changed |= first.absorb_own_row(lhs, rhs1);
            changed |= last.absorb_own_row(lhs, rhs2);
        }
    }

    let mut precursor = NtTerminalMatrix::new(nt_count, terminal_count);
    let mut follower = NtTerminalMatrix::new(nt_count, terminal_count);
    changed = true;
    while changed {
        changed = false;
        for &(lhs, rhs1, rhs2) in &binary {
            // lhs -> rhs1 rhs2: rhs2 is preceded by whatever rhs1 can end with,
            // rhs1 by whatever precedes lhs; symmetrically for followers.
            changed |= precursor.absorb_row(rhs2, &last, rhs1);
            changed |= precursor.absorb_own_row(rhs1, lhs);
            changed |= follower.absorb_row(rhs1, &first, rhs2);
            changed |= follower.absorb_own_row(rhs2, lhs);
        }
    }

    PruningTables {
        can_start_with: first,
        can_end_with: last,
        has_precursor_starting_with: precursor,
        has_follower_ending_with: follower,
    }
}
