use tracing::{debug, info};

use crate::chart::{Lookup, MemoTable, SpanIndexer};
use crate::error::{Result, ScfgError};
use crate::grammar::{Grammar, Production};
use crate::parameters::ParamId;

/// A corpus string, kept both as raw text and as terminal indices.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusString {
    pub text: String,
    pub tokens: Vec<usize>,
}

/// Inside and outside memo tables for one corpus string.
#[derive(Debug, Clone)]
struct StringTables {
    indexer: SpanIndexer,
    inside: MemoTable,
    outside: MemoTable,
}

impl StringTables {
    fn new(len: usize, nt_count: usize) -> Self {
        let indexer = SpanIndexer::new(len, nt_count);
        Self {
            indexer,
            inside: MemoTable::new(indexer),
            outside: MemoTable::new(indexer),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounters {
    pub inside: u64,
    pub outside: u64,
}

/// A grammar paired with a corpus and the dynamic-programming state over it.
#[derive(Debug, Clone)]
pub struct Scfg {
    grammar: Grammar,
    corpus: Vec<CorpusString>,
    tables: Vec<StringTables>,
    counters: CallCounters,
}

impl Scfg {
    pub fn new(grammar: Grammar) -> Self {
        Self {
            grammar,
            corpus: Vec::new(),
            tables: Vec::new(),
            counters: CallCounters::default(),
        }
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn corpus(&self) -> &[CorpusString] {
        &self.corpus
    }

    pub fn counters(&self) -> CallCounters {
        self.counters
    }

    /// Replaces the corpus. Every string is tokenized first; if any fails,
    /// the previous corpus and its tables stay in place.
    pub fn set_corpus<S: AsRef<str>>(&mut self, strings: &[S]) -> Result<()> {
        let mut corpus = Vec::with_capacity(strings.len());
        for text in strings {
            let text = text.as_ref();
            if text.is_empty() {
                return Err(ScfgError::Tokenization {
                    input: String::new(),
                    position: 0,
                });
            }
            let tokens = self.grammar.tokenize(text)?;
            corpus.push(CorpusString {
                text: text.to_string(),
                tokens,
            });
        }

        let nt_count = self.grammar.nt_count();
        self.tables = corpus
            .iter()
            .map(|s| StringTables::new(s.tokens.len(), nt_count))
            .collect();
        self.corpus = corpus;
        self.counters = CallCounters::default();
        info!(strings = self.corpus.len(), "corpus loaded");
        Ok(())
    }

    pub fn set_parameter_values(&mut self, updates: &[(ParamId, f64)]) -> Result<()> {
        self.grammar.set_parameter_values(updates)
    }

    /// Forces both tables of every string to be rebuilt on next access.
    pub fn reset_tables(&mut self) {
        for tables in &mut self.tables {
            tables.inside.invalidate();
            tables.outside.invalidate();
        }
    }

    fn evaluator(&mut self, string_index: usize) -> Result<Evaluator<'_>> {
        let len = self.corpus.len();
        let tables = self.tables.get_mut(string_index).ok_or(ScfgError::CorpusIndex {
            index: string_index,
            len,
        })?;
        let epoch = self.grammar.parameter_epoch();
        tables.inside.sync(epoch);
        tables.outside.sync(epoch);
        Ok(Evaluator {
            grammar: &self.grammar,
            tokens: &self.corpus[string_index].tokens,
            tables,
            counters: &mut self.counters,
        })
    }

    fn check_span(&self, start: usize, end: usize, string_index: usize, nt: usize) -> Result<()> {
        let corpus_len = self.corpus.len();
        let string = self.corpus.get(string_index).ok_or(ScfgError::CorpusIndex {
            index: string_index,
            len: corpus_len,
        })?;
        if start > end || end >= string.tokens.len() || nt >= self.grammar.nt_count() {
            return Err(ScfgError::SpanOutOfRange {
                start,
                end,
                non_terminal: nt,
                string_index,
            });
        }
        Ok(())
    }

    /// Probability that `nt` derives tokens `start..=end` of corpus string
    /// `string_index`.
    pub fn inside_probability(
        &mut self,
        start: usize,
        end: usize,
        string_index: usize,
        nt: usize,
    ) -> Result<f64> {
        self.check_span(start, end, string_index, nt)?;
        Ok(self.evaluator(string_index)?.inside(start, end, nt).0)
    }

    /// Probability of deriving the whole string from the start symbol with
    /// `nt` spanning exactly `start..=end`, excluding that span's own
    /// derivation.
    pub fn outside_probability(
        &mut self,
        start: usize,
        end: usize,
        string_index: usize,
        nt: usize,
    ) -> Result<f64> {
        self.check_span(start, end, string_index, nt)?;
        Ok(self.evaluator(string_index)?.outside(start, end, nt).0)
    }

    /// Full-span inside probability of the start symbol.
    pub fn string_probability(&mut self, string_index: usize) -> Result<f64> {
        let len = self
            .corpus
            .get(string_index)
            .map(|s| s.tokens.len())
            .ok_or(ScfgError::CorpusIndex {
                index: string_index,
                len: self.corpus.len(),
            })?;
        let start_symbol = self.grammar.start();
        self.inside_probability(0, len - 1, string_index, start_symbol)
    }

    /// Corpus log-likelihood: the sum over strings of the log of each
    /// string's derivation probability. `-inf` if any string is impossible.
    pub fn log_likelihood(&mut self) -> Result<f64> {
        let mut total = 0.0;
        for string_index in 0..self.corpus.len() {
            let p = self.string_probability(string_index)?;
            total += p.ln();
        }
        debug!(
            log_likelihood = total,
            inside_calls = self.counters.inside,
            "corpus likelihood computed"
        );
        Ok(total)
    }

    /// (entries, constant-one entries, visited triples) of a string's inside table.
    pub fn inside_table_stats(&self, string_index: usize) -> Option<(usize, usize, usize)> {
        self.tables
            .get(string_index)
            .map(|t| (t.inside.len(), t.inside.constant_count(), t.inside.visited()))
    }
}

/// One pending memo cell: `(start, end, non-terminal)` of either table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    Inside(usize, usize, usize),
    Outside(usize, usize, usize),
}

/// Memoized evaluation over one string. Holds exclusive access to that
/// string's tables for the duration of a traversal.
///
/// Cells are resolved from an explicit work stack rather than by recursion,
/// so the depth of a derivation never becomes call-stack depth.
struct Evaluator<'a> {
    grammar: &'a Grammar,
    tokens: &'a [usize],
    tables: &'a mut StringTables,
    counters: &'a mut CallCounters,
}

impl Evaluator<'_> {
    /// Returns (probability, parameter independent).
    fn inside(&mut self, start: usize, end: usize, nt: usize) -> (f64, bool) {
        self.resolve(Cell::Inside(start, end, nt))
    }

    fn outside(&mut self, start: usize, end: usize, nt: usize) -> (f64, bool) {
        self.resolve(Cell::Outside(start, end, nt))
    }

    fn resolve(&mut self, cell: Cell) -> (f64, bool) {
        let mut work_stack = vec![cell];
        let mut missing = Vec::new();

        while let Some(&top) = work_stack.last() {
            if self.known(top).is_some() {
                work_stack.pop();
                continue;
            }
            let combined = match top {
                Cell::Inside(start, end, nt) => self.combine_inside(start, end, nt, &mut missing),
                Cell::Outside(start, end, nt) => self.combine_outside(start, end, nt, &mut missing),
            };
            if missing.is_empty() {
                work_stack.pop();
                self.record(top, combined);
            } else {
                // revisit `top` once everything it read is known
                work_stack.append(&mut missing);
            }
        }

        self.known(cell).unwrap_or((0.0, true))
    }

    fn known(&self, cell: Cell) -> Option<(f64, bool)> {
        let (table, start, end, nt) = match cell {
            Cell::Inside(start, end, nt) => (&self.tables.inside, start, end, nt),
            Cell::Outside(start, end, nt) => (&self.tables.outside, start, end, nt),
        };
        let Some(index) = self.tables.indexer.index(start, end, nt) else {
            return Some((0.0, true));
        };
        match table.lookup(index) {
            Lookup::Known { value, constant } => Some((value, constant)),
            Lookup::Unknown => None,
        }
    }

    fn record(&mut self, cell: Cell, (value, constant): (f64, bool)) {
        let indexer = self.tables.indexer;
        match cell {
            Cell::Inside(start, end, nt) => {
                if let Some(index) = indexer.index(start, end, nt) {
                    self.counters.inside += 1;
                    self.tables.inside.store(index, value, constant);
                }
            }
            Cell::Outside(start, end, nt) => {
                if let Some(index) = indexer.index(start, end, nt) {
                    self.counters.outside += 1;
                    self.tables.outside.store(index, value, constant);
                }
            }
        }
    }

    /// Value of `cell` if already known; otherwise queues it and returns `None`.
    fn require(&self, cell: Cell, missing: &mut Vec<Cell>) -> Option<(f64, bool)> {
        let value = self.known(cell);
        if value.is_none() {
            missing.push(cell);
        }
        value
    }

    /// Non-terminals without binary rules only ever cover a single token.
    fn single_token(&self, nt: usize) -> bool {
        self.grammar.rules_by_lhs_binary(nt).is_empty()
    }

    fn may_cover(&self, nt: usize, start: usize, end: usize) -> bool {
        let pruning = self.grammar.pruning();
        pruning.can_start_with.get(nt, self.tokens[start])
            && pruning.can_end_with.get(nt, self.tokens[end])
            && (start == end || !self.single_token(nt))
    }

    fn combine_inside(
        &self,
        start: usize,
        end: usize,
        nt: usize,
        missing: &mut Vec<Cell>,
    ) -> (f64, bool) {
        let grammar = self.grammar;
        if !self.may_cover(nt, start, end) {
            return (0.0, true);
        }

        if start == end {
            return match grammar.terminal_rule(nt, self.tokens[start]) {
                Some(rule) => (grammar.value(rule), grammar.is_deterministic(rule)),
                None => (0.0, true),
            };
        }

        let mut sum = 0.0;
        let mut constant = true;
        for &rule_index in grammar.rules_by_lhs_binary(nt) {
            let Production::Binary { rhs1, rhs2 } = grammar.production(rule_index) else {
                continue;
            };
            let rule_p = grammar.value(rule_index);
            let rule_constant = grammar.is_deterministic(rule_index);

            let splits = if self.single_token(rhs1) {
                start..start + 1
            } else if self.single_token(rhs2) {
                end - 1..end
            } else {
                start..end
            };
            for split in splits {
                if !self.may_cover(rhs1, start, split) || !self.may_cover(rhs2, split + 1, end) {
                    continue;
                }
                let Some((left, left_constant)) =
                    self.require(Cell::Inside(start, split, rhs1), missing)
                else {
                    continue;
                };
                if left == 0.0 && left_constant {
                    continue;
                }
                let Some((right, right_constant)) =
                    self.require(Cell::Inside(split + 1, end, rhs2), missing)
                else {
                    continue;
                };
                if right == 0.0 && right_constant {
                    continue;
                }
                sum += rule_p * left * right;
                constant &= rule_constant && left_constant && right_constant;
            }
        }
        (sum, constant)
    }

    fn combine_outside(
        &self,
        start: usize,
        end: usize,
        nt: usize,
        missing: &mut Vec<Cell>,
    ) -> (f64, bool) {
        let grammar = self.grammar;
        let last = self.tokens.len() - 1;
        if start == 0 && end == last {
            return (if nt == grammar.start() { 1.0 } else { 0.0 }, true);
        }

        let pruning = grammar.pruning();
        if (start > 0 && !pruning.has_precursor_starting_with.get(nt, self.tokens[start - 1]))
            || (end < last && !pruning.has_follower_ending_with.get(nt, self.tokens[end + 1]))
        {
            return (0.0, true);
        }

        let mut sum = 0.0;
        let mut constant = true;

        // parent -> nt sibling, sibling covering end+1..=right
        for &rule_index in grammar.rules_by_rhs1(nt) {
            let Production::Binary { rhs2: sibling, .. } = grammar.production(rule_index) else {
                continue;
            };
            let parent_nt = grammar.lhs(rule_index);
            let rule_p = grammar.value(rule_index);
            let rule_constant = grammar.is_deterministic(rule_index);
            let rights = if self.single_token(sibling) {
                end + 1..=last.min(end + 1)
            } else {
                end + 1..=last
            };
            for right in rights {
                if !self.may_cover(sibling, end + 1, right) {
                    continue;
                }
                let Some((sib, sib_constant)) =
                    self.require(Cell::Inside(end + 1, right, sibling), missing)
                else {
                    continue;
                };
                if sib == 0.0 && sib_constant {
                    continue;
                }
                let Some((parent, parent_constant)) =
                    self.require(Cell::Outside(start, right, parent_nt), missing)
                else {
                    continue;
                };
                if parent == 0.0 && parent_constant {
                    continue;
                }
                sum += parent * rule_p * sib;
                constant &= rule_constant && sib_constant && parent_constant;
            }
        }

        // parent -> sibling nt, sibling covering left..=start-1
        for &rule_index in grammar.rules_by_rhs2(nt) {
            let Production::Binary { rhs1: sibling, .. } = grammar.production(rule_index) else {
                continue;
            };
            let parent_nt = grammar.lhs(rule_index);
            let rule_p = grammar.value(rule_index);
            let rule_constant = grammar.is_deterministic(rule_index);
            let lefts = if self.single_token(sibling) {
                start.saturating_sub(1)..start
            } else {
                0..start
            };
            for left in lefts {
                if !self.may_cover(sibling, left, start - 1) {
                    continue;
                }
                let Some((sib, sib_constant)) =
                    self.require(Cell::Inside(left, start - 1, sibling), missing)
                else {
                    continue;
                };
                if sib == 0.0 && sib_constant {
                    continue;
                }
                let Some((parent, parent_constant)) =
                    self.require(Cell::Outside(left, end, parent_nt), missing)
                else {
                    continue;
                };
                if parent == 0.0 && parent_constant {
                    continue;
                }
                sum += parent * rule_p * sib;
                constant &= rule_constant && sib_constant && parent_constant;
            }
        }

        (sum, constant)
    }
}
