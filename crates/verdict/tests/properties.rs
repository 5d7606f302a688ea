//! Property tests for the runtime over generated fact sets.

use std::collections::BTreeSet;

use proptest::prelude::*;
use verdict::{PolicyKind, Runtime, RuntimeConfig};

fn facts(table: &'static str) -> impl Strategy<Value = BTreeSet<(&'static str, i64)>> {
    prop::collection::btree_set((Just(table), 0i64..8), 0..6)
}

fn load(runtime: &mut Runtime, facts: &BTreeSet<(&str, i64)>) {
    for (table, value) in facts {
        runtime
            .insert(&format!("{table}({value})"), None)
            .expect("fact inserts");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// A fact derived through two rules stays visible until both of its
    /// supports are gone.
    #[test]
    fn derived_facts_survive_partial_retraction(
        qs in facts("q"),
        rs in facts("r"),
        retract_q in any::<bool>(),
    ) {
        let mut runtime = Runtime::new();
        runtime.load("p(x) :- q(x)  p(x) :- r(x)", None).unwrap();
        load(&mut runtime, &qs);
        load(&mut runtime, &rs);

        let (removed, kept) = if retract_q { (&qs, &rs) } else { (&rs, &qs) };
        for (table, value) in removed {
            runtime.delete(&format!("{table}({value})"), None).unwrap();
        }

        let expected: Vec<String> = kept
            .iter()
            .map(|(_, v)| *v)
            .collect::<BTreeSet<_>>()
            .iter()
            .map(|v| format!("p({v})"))
            .collect();
        prop_assert_eq!(runtime.select("p(x)", None).unwrap(), expected);
    }

    /// Inserting then deleting a rule restores every table.
    #[test]
    fn rule_retraction_is_symmetric(qs in facts("q"), rs in facts("r")) {
        let mut runtime = Runtime::new();
        runtime.load("s(x) :- r(x)", None).unwrap();
        load(&mut runtime, &qs);
        load(&mut runtime, &rs);
        let before = runtime.content(None, None).unwrap();
        let consequences = runtime.consequences(None).unwrap();

        let rule = "p(x) :- q(x), not s(x), plus(x, 1, y), q(y)";
        runtime.insert(rule, None).unwrap();
        runtime.delete(rule, None).unwrap();

        prop_assert_eq!(runtime.content(None, None).unwrap(), before);
        prop_assert_eq!(runtime.consequences(None).unwrap(), consequences);
        prop_assert!(runtime.select("p(x)", None).unwrap().is_empty());
    }

    /// Materialized and on-demand policies agree on the same program.
    #[test]
    fn policy_kinds_agree(qs in facts("q"), rs in facts("r")) {
        let mut config = RuntimeConfig::default();
        config.policies.push(verdict::PolicyConfig::new("mirror", PolicyKind::Nonrecursive, &[]));
        let mut runtime = Runtime::from_config(&config).unwrap();

        let program = "p(x) :- q(x), not r(x)  t(x, y) :- q(x), q(y), lt(x, y)";
        for target in ["classification", "mirror"] {
            runtime.load(program, Some(target)).unwrap();
            for (table, value) in qs.iter().chain(rs.iter()) {
                runtime.insert(&format!("{table}({value})"), Some(target)).unwrap();
            }
        }

        for query in ["p(x)", "t(x, y)"] {
            prop_assert_eq!(
                runtime.select(query, Some("classification")).unwrap(),
                runtime.select(query, Some("mirror")).unwrap()
            );
        }
    }
}
