use proptest::prelude::*;
use scfg::grammar::Production;
use scfg::parser::parse_grammar_text;
use scfg::{Grammar, Scfg};

// Deterministic rules wrapped around one parametric non-terminal, so the
// memo tables hold constant-one entries next to parameter dependent ones.
const GRAMMAR: &str = "\
param a = 0.4
param c = 0.5
0 -> 1 2
1 -> 4 5
2 -> 6 3
3 -> 6 3 : c
3 -> \"w\" : a * (1 - c)
3 -> \"v\" : (1 - a) * (1 - c)
4 -> \"x\"
5 -> \"y\"
6 -> \"z\"
";

fn grammar_with(a: f64, c: f64) -> Grammar {
    let mut grammar = Grammar::from_spec(parse_grammar_text(GRAMMAR).unwrap()).unwrap();
    let a_id = grammar.parameters().id("a").unwrap();
    let c_id = grammar.parameters().id("c").unwrap();
    grammar.set_parameter_values(&[(a_id, a), (c_id, c)]).unwrap();
    grammar
}

fn rule_value(grammar: &Grammar, rule: usize) -> f64 {
    grammar.probability(rule).unwrap()
}

fn naive_inside(grammar: &Grammar, tokens: &[usize], start: usize, end: usize, nt: usize) -> f64 {
    if start == end {
        return grammar
            .terminal_rule(nt, tokens[start])
            .map_or(0.0, |rule| rule_value(grammar, rule));
    }
    let mut total = 0.0;
    for &rule in grammar.rules_by_lhs_binary(nt) {
        let Production::Binary { rhs1, rhs2 } = grammar.rule(rule).unwrap().production else {
            continue;
        };
        for split in start..end {
            total += rule_value(grammar, rule)
                * naive_inside(grammar, tokens, start, split, rhs1)
                * naive_inside(grammar, tokens, split + 1, end, rhs2);
        }
    }
    total
}

/// Outside probability summed over every parent rule, without pruning.
fn naive_outside(grammar: &Grammar, tokens: &[usize], start: usize, end: usize, nt: usize) -> f64 {
    let last = tokens.len() - 1;
    if start == 0 && end == last {
        return if nt == grammar.start() { 1.0 } else { 0.0 };
    }
    let mut total = 0.0;
    for (rule, definition) in grammar.rules().iter().enumerate() {
        let Production::Binary { rhs1, rhs2 } = definition.production else {
            continue;
        };
        let p = rule_value(grammar, rule);
        if rhs1 == nt {
            for right in end + 1..=last {
                total += p
                    * naive_outside(grammar, tokens, start, right, definition.lhs)
                    * naive_inside(grammar, tokens, end + 1, right, rhs2);
            }
        }
        if rhs2 == nt {
            for left in 0..start {
                total += p
                    * naive_outside(grammar, tokens, left, end, definition.lhs)
                    * naive_inside(grammar, tokens, left, start - 1, rhs1);
            }
        }
    }
    total
}

fn close(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() <= 1e-12 + 1e-9 * expected.abs()
}

fn string_strategy() -> impl Strategy<Value = String> {
    let sentence = (0usize..4, prop_oneof![Just("w"), Just("v")])
        .prop_map(|(zs, last)| format!("xy{}z{}", "z".repeat(zs), last));
    let noise = prop::collection::vec(
        prop_oneof![Just('x'), Just('y'), Just('z'), Just('w'), Just('v')],
        1..7,
    )
    .prop_map(|chars| chars.into_iter().collect());
    prop_oneof![3 => sentence, 1 => noise]
}

prop_compose! {
    fn parameter_strategy()
        (a in 0.05f64..0.95, c in 0.05f64..0.95)
        -> (f64, f64)
    {
        (a, c)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_cell_follows_a_parameter_change(
        text in string_strategy(),
        (a, c) in parameter_strategy(),
        (a2, c2) in parameter_strategy(),
    ) {
        let mut scfg = Scfg::new(grammar_with(a, c));
        scfg.set_corpus(&[text.as_str()]).unwrap();
        let len = scfg.corpus()[0].tokens.len();
        let nt_count = scfg.grammar().nt_count();

        for start in 0..len {
            for end in start..len {
                for nt in 0..nt_count {
                    scfg.inside_probability(start, end, 0, nt).unwrap();
                    scfg.outside_probability(start, end, 0, nt).unwrap();
                }
            }
        }

        let a_id = scfg.grammar().parameters().id("a").unwrap();
        let c_id = scfg.grammar().parameters().id("c").unwrap();
        scfg.set_parameter_values(&[(a_id, a2), (c_id, c2)]).unwrap();

        let oracle = grammar_with(a2, c2);
        let tokens = oracle.tokenize(&text).unwrap();
        // outside first, so it reads inside cells from the new epoch lazily
        for start in 0..len {
            for end in start..len {
                for nt in 0..nt_count {
                    let outside = scfg.outside_probability(start, end, 0, nt).unwrap();
                    let expected = naive_outside(&oracle, &tokens, start, end, nt);
                    prop_assert!(
                        close(outside, expected),
                        "outside {}..={} nt {}: {} vs {}", start, end, nt, outside, expected
                    );
                    let inside = scfg.inside_probability(start, end, 0, nt).unwrap();
                    let expected = naive_inside(&oracle, &tokens, start, end, nt);
                    prop_assert!(
                        close(inside, expected),
                        "inside {}..={} nt {}: {} vs {}", start, end, nt, inside, expected
                    );
                }
            }
        }
    }
}
