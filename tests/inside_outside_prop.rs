use proptest::prelude::*;
use scfg::cyk::best_parse;
use scfg::grammar::Production;
use scfg::parser::parse_grammar_text;
use scfg::{Grammar, Scfg};

const GRAMMAR: &str = "\
param a = 0.3
param b = 0.3
param c = 0.5
0 -> 0 1 : a
0 -> 1 0 : b
0 -> \"x\" : 1 - a - b
1 -> 0 0 : c
1 -> \"y\" : 1 - c
";

fn grammar_with(a: f64, b: f64, c: f64) -> Grammar {
    let mut grammar = Grammar::from_spec(parse_grammar_text(GRAMMAR).unwrap()).unwrap();
    let ids: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|name| grammar.parameters().id(name).unwrap())
        .collect();
    grammar
        .set_parameter_values(&[(ids[0], a), (ids[1], b), (ids[2], c)])
        .unwrap();
    grammar
}

/// Unmemoized inside recursion straight from the definition.
fn naive_inside(grammar: &Grammar, tokens: &[usize], start: usize, end: usize, nt: usize) -> f64 {
    if start == end {
        return grammar
            .terminal_rule(nt, tokens[start])
            .map_or(0.0, |rule| grammar.probability(rule).unwrap());
    }
    let mut total = 0.0;
    for &rule in grammar.rules_by_lhs_binary(nt) {
        let Production::Binary { rhs1, rhs2 } = grammar.rule(rule).unwrap().production else {
            continue;
        };
        for split in start..end {
            total += grammar.probability(rule).unwrap()
                * naive_inside(grammar, tokens, start, split, rhs1)
                * naive_inside(grammar, tokens, split + 1, end, rhs2);
        }
    }
    total
}

fn close(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() <= 1e-12 + 1e-9 * expected.abs()
}

fn string_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(prop_oneof![Just('x'), Just('y')], 1..7)
        .prop_map(|chars| chars.into_iter().collect())
}

prop_compose! {
    fn parameter_strategy()
        (a in 0.05f64..0.45, b in 0.05f64..0.45, c in 0.05f64..0.95)
        -> (f64, f64, f64)
    {
        (a, b, c)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn memoized_inside_matches_naive_recursion(
        text in string_strategy(),
        (a, b, c) in parameter_strategy(),
    ) {
        let grammar = grammar_with(a, b, c);
        let tokens = grammar.tokenize(&text).unwrap();
        let mut scfg = Scfg::new(grammar.clone());
        scfg.set_corpus(&[text.as_str()]).unwrap();

        for start in 0..tokens.len() {
            for end in start..tokens.len() {
                for nt in 0..grammar.nt_count() {
                    let memoized = scfg.inside_probability(start, end, 0, nt).unwrap();
                    let expected = naive_inside(&grammar, &tokens, start, end, nt);
                    prop_assert!(
                        close(memoized, expected),
                        "span {}..={} nt {}: {} vs {}", start, end, nt, memoized, expected
                    );
                }
            }
        }
    }

    #[test]
    fn inside_times_outside_sums_to_string_probability(
        text in string_strategy(),
        (a, b, c) in parameter_strategy(),
    ) {
        let mut scfg = Scfg::new(grammar_with(a, b, c));
        scfg.set_corpus(&[text.as_str()]).unwrap();
        let total = scfg.string_probability(0).unwrap();
        let len = scfg.corpus()[0].tokens.len();

        for position in 0..len {
            let mut sum = 0.0;
            for nt in 0..scfg.grammar().nt_count() {
                sum += scfg.inside_probability(position, position, 0, nt).unwrap()
                    * scfg.outside_probability(position, position, 0, nt).unwrap();
            }
            prop_assert!(close(sum, total), "position {}: {} vs {}", position, sum, total);
        }
    }

    #[test]
    fn cached_tables_follow_parameter_changes(
        text in string_strategy(),
        (a, b, c) in parameter_strategy(),
        (a2, b2, c2) in parameter_strategy(),
    ) {
        let mut reused = Scfg::new(grammar_with(a, b, c));
        reused.set_corpus(&[text.as_str()]).unwrap();
        reused.string_probability(0).unwrap();

        let ids: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|name| reused.grammar().parameters().id(name).unwrap())
            .collect();
        reused
            .set_parameter_values(&[(ids[0], a2), (ids[1], b2), (ids[2], c2)])
            .unwrap();

        let mut fresh = Scfg::new(grammar_with(a2, b2, c2));
        fresh.set_corpus(&[text.as_str()]).unwrap();

        let expected = fresh.string_probability(0).unwrap();
        prop_assert!(close(reused.string_probability(0).unwrap(), expected));
        let last = text.len() - 1;
        prop_assert!(close(
            reused.outside_probability(0, 0, 0, 0).unwrap(),
            fresh.outside_probability(0, 0, 0, 0).unwrap()
        ));
        prop_assert!(close(
            reused.outside_probability(last, last, 0, 1).unwrap(),
            fresh.outside_probability(last, last, 0, 1).unwrap()
        ));
    }

    #[test]
    fn best_parse_is_bounded_by_inside_probability(
        text in string_strategy(),
        (a, b, c) in parameter_strategy(),
    ) {
        let mut scfg = Scfg::new(grammar_with(a, b, c));
        scfg.set_corpus(&[text.as_str()]).unwrap();
        let total = scfg.string_probability(0).unwrap();

        match best_parse(scfg.grammar(), &scfg.corpus()[0].tokens, 0) {
            Ok(tree) => {
                prop_assert!(total > 0.0);
                prop_assert!(tree.probability <= total * (1.0 + 1e-9));
                prop_assert_eq!(tree.root.end, text.len() - 1);
            }
            Err(_) => {
                prop_assert_eq!(total, 0.0);
            }
        }
    }
}
