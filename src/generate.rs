use rand::Rng;

use crate::error::{Result, ScfgError};
use crate::grammar::{Grammar, Production};

/// Expands `from` (the start symbol when `None`) top-down, picking each
/// rule with probability proportional to its current value.
///
/// `max_depth` caps derivation-tree depth; exceeding it fails with
/// `DerivationDepthExceeded`.
pub fn spawn_random_string<R: Rng>(
    grammar: &Grammar,
    from: Option<usize>,
    max_depth: Option<usize>,
    rng: &mut R,
) -> Result<String> {
    let root = from.unwrap_or(grammar.start());
    if root >= grammar.nt_count() {
        return Err(ScfgError::UnknownNonTerminal {
            non_terminal: root,
            nt_count: grammar.nt_count(),
        });
    }

    let mut output = String::new();
    // Explicit stack of (non-terminal, depth); right children are pushed
    // first so the left subtree is emitted first.
    let mut pending = vec![(root, 1usize)];

    while let Some((nt, depth)) = pending.pop() {
        if let Some(limit) = max_depth {
            if depth > limit {
                return Err(ScfgError::DerivationDepthExceeded { max_depth: limit });
            }
        }
        let rule = choose_rule(grammar, nt, rng)?;
        match grammar.production(rule) {
            Production::Terminal { terminal } => output.push_str(&grammar.terminals()[terminal]),
            Production::Binary { rhs1, rhs2 } => {
                pending.push((rhs2, depth + 1));
                pending.push((rhs1, depth + 1));
            }
        }
    }

    Ok(output)
}

/// Cumulative-probability draw over the rules of `nt` in declaration order.
/// Fails when no rule of `nt` can be drawn.
fn choose_rule<R: Rng>(grammar: &Grammar, nt: usize, rng: &mut R) -> Result<usize> {
    let candidates = grammar.rules_by_lhs(nt);
    let total: f64 = candidates
        .iter()
        .map(|&rule| grammar.value(rule).max(0.0))
        .sum();
    if total <= 0.0 {
        return Err(ScfgError::probability(
            format!("non-terminal {}", nt),
            "no rule has positive probability",
        ));
    }
    if candidates.len() == 1 {
        return Ok(candidates[0]);
    }
    let target = rng.gen::<f64>() * total;

    let mut cumulative = 0.0;
    for &rule in &candidates {
        cumulative += grammar.value(rule).max(0.0);
        if target < cumulative {
            return Ok(rule);
        }
    }
    // Rounding can leave `target` just past the final sum.
    candidates
        .iter()
        .rev()
        .copied()
        .find(|&rule| grammar.value(rule) > 0.0)
        .ok_or_else(|| {
            ScfgError::probability(format!("non-terminal {}", nt), "no rule has positive probability")
        })
}
