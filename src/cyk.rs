use std::collections::HashMap;

use crate::engine::Scfg;
use crate::error::{Result, ScfgError};
use crate::grammar::{quote_literal, Grammar, Production};
use crate::structs::{ParseNode, ParseTree};

#[derive(Debug, Clone)]
struct ChartEntry {
    probability: f64,
    backpointer: BackPointer,
}

#[derive(Debug, Clone)]
enum BackPointer {
    Terminal {
        rule: usize,
    },
    Binary {
        rule: usize,
        split_point: usize,
        left_child_non_terminal_id: usize,
        right_child_non_terminal_id: usize,
    },
}

// chart[start][end] for inclusive spans
type Chart = Vec<Vec<HashMap<usize, ChartEntry>>>;

/// Maximum-probability derivation of `tokens` from the start symbol.
///
/// Ties go to the rule declared first, then to the leftmost split point.
pub fn best_parse(grammar: &Grammar, tokens: &[usize], string_index: usize) -> Result<ParseTree> {
    let n = tokens.len();
    if n == 0 {
        return Err(ScfgError::ParseFailure { string_index });
    }
    let pruning = grammar.pruning();

    let mut chart: Chart = vec![vec![HashMap::new(); n]; n];

    // Fill chart with terminal rules for individual tokens
    for (i, &token) in tokens.iter().enumerate() {
        for nt in 0..grammar.nt_count() {
            if let Some(rule) = grammar.terminal_rule(nt, token) {
                let probability = grammar.value(rule);
                if probability > 0.0 {
                    chart[i][i].insert(
                        nt,
                        ChartEntry {
                            probability,
                            backpointer: BackPointer::Terminal { rule },
                        },
                    );
                }
            }
        }
    }

    //  Main CYK loop: fill cells for spans of length > 1
    for r in 2..=n {
        for i in 0..=(n - r) {
            let j = i + r - 1;
            let mut cell: HashMap<usize, ChartEntry> = HashMap::new();

            for nt in 0..grammar.nt_count() {
                if !pruning.can_start_with.get(nt, tokens[i]) || !pruning.can_end_with.get(nt, tokens[j]) {
                    continue;
                }
                let mut best: Option<ChartEntry> = None;

                for &rule in grammar.rules_by_lhs_binary(nt) {
                    let Production::Binary { rhs1, rhs2 } = grammar.production(rule) else {
                        continue;
                    };
                    let rule_p = grammar.value(rule);
                    if rule_p <= 0.0 {
                        continue;
                    }
                    for m in i..j {
                        let Some(left) = chart[i][m].get(&rhs1) else { continue };
                        let Some(right) = chart[m + 1][j].get(&rhs2) else { continue };
                        let probability = rule_p * left.probability * right.probability;
                        let improves = best
                            .as_ref()
                            .map_or(probability > 0.0, |b| probability > b.probability);
                        if improves {
                            best = Some(ChartEntry {
                                probability,
                                backpointer: BackPointer::Binary {
                                    rule,
                                    split_point: m,
                                    left_child_non_terminal_id: rhs1,
                                    right_child_non_terminal_id: rhs2,
                                },
                            });
                        }
                    }
                }

                if let Some(entry) = best {
                    cell.insert(nt, entry);
                }
            }

            chart[i][j] = cell;
        }
    }

    match chart[0][n - 1].get(&grammar.start()) {
        Some(entry) if entry.probability > 0.0 => Ok(ParseTree {
            probability: entry.probability,
            root: reconstruct_tree(&chart, grammar.start(), 0, n - 1),
        }),
        _ => Err(ScfgError::ParseFailure { string_index }),
    }
}

// rekursive reconstruction of the parse tree from the completed CYK chart
fn reconstruct_tree(chart: &Chart, non_terminal_id: usize, i: usize, j: usize) -> ParseNode {
    // Every backpointer names a child that was present when it was recorded.
    let entry = &chart[i][j][&non_terminal_id];

    match entry.backpointer {
        BackPointer::Terminal { rule } => ParseNode {
            start: i,
            end: j,
            non_terminal: non_terminal_id,
            rule,
            split: None,
            children: Vec::new(),
        },
        BackPointer::Binary {
            rule,
            split_point,
            left_child_non_terminal_id,
            right_child_non_terminal_id,
        } => {
            let m = split_point;
            let left_tree = reconstruct_tree(chart, left_child_non_terminal_id, i, m);
            let right_tree = reconstruct_tree(chart, right_child_non_terminal_id, m + 1, j);
            ParseNode {
                start: i,
                end: j,
                non_terminal: non_terminal_id,
                rule,
                split: Some(m),
                children: vec![left_tree, right_tree],
            }
        }
    }
}

impl ParseTree {
    /// `(NT literal)` for leaves and `(NT left right)` for binary nodes.
    pub fn to_bracketed(&self, grammar: &Grammar) -> String {
        bracketed(&self.root, grammar)
    }
}

fn bracketed(node: &ParseNode, grammar: &Grammar) -> String {
    match grammar.production(node.rule) {
        Production::Terminal { terminal } => {
            let literal = grammar.terminals()[terminal].as_str();
            let shown = if literal.chars().any(|c| c.is_whitespace() || c == '(' || c == ')') {
                quote_literal(literal)
            } else {
                literal.to_string()
            };
            format!("({} {})", node.non_terminal, shown)
        }
        Production::Binary { .. } => {
            let left = bracketed(&node.children[0], grammar);
            let right = bracketed(&node.children[1], grammar);
            format!("({} {} {})", node.non_terminal, left, right)
        }
    }
}

impl Scfg {
    /// Best parse of one corpus string.
    pub fn best_parse(&self, string_index: usize) -> Result<ParseTree> {
        let string = self.corpus().get(string_index).ok_or(ScfgError::CorpusIndex {
            index: string_index,
            len: self.corpus().len(),
        })?;
        best_parse(self.grammar(), &string.tokens, string_index)
    }

    /// Best parse of every corpus string; failures are reported per string.
    pub fn best_parse_all(&self) -> Vec<Result<ParseTree>> {
        (0..self.corpus().len())
            .map(|string_index| self.best_parse(string_index))
            .collect()
    }
}
