//! Property-based tests using proptest.
//!
//! These tests verify invariants of the CRP, the conjugate distributions and
//! the relational models.

use hirm::crp::Crp;
use hirm::distributions::{BetaBernoulli, DirichletCategorical, Distribution, Normal};
use hirm::prelude::*;
use proptest::prelude::*;

// Strategy for (item, table) seatings with distinct items
fn seating_strategy() -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(0usize..5, 1..30)
}

fn real_strategy() -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(-50.0f64..50.0, 1..20)
}

fn seated(tables: &[usize], alpha: f64) -> Crp {
    let mut crp = Crp::with_alpha(alpha).expect("positive alpha");
    for (item, &table) in tables.iter().enumerate() {
        crp.incorporate(item, table).expect("fresh item");
    }
    crp
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // CRP properties
    #[test]
    fn crp_n_is_sum_of_table_sizes(tables in seating_strategy()) {
        let crp = seated(&tables, 1.0);
        let total: usize = crp.tables().values().map(|t| t.len()).sum();
        prop_assert_eq!(crp.n(), total);
        prop_assert_eq!(crp.assignments().len(), tables.len());
        for (item, table) in crp.assignments() {
            prop_assert!(crp.tables()[table].contains(item));
        }
    }

    #[test]
    fn crp_weights_sum_to_n_plus_alpha(tables in seating_strategy(), alpha in 0.1f64..10.0) {
        let crp = seated(&tables, alpha);
        let sum: f64 = crp.tables_weights().values().sum();
        prop_assert!((sum - (crp.n() as f64 + alpha)).abs() < 1e-9);
    }

    #[test]
    fn crp_logp_matches_normalized_weights(tables in seating_strategy(), alpha in 0.1f64..10.0) {
        let crp = seated(&tables, alpha);
        let weights = crp.tables_weights();
        let total: f64 = weights.values().sum();
        for (&table, &w) in &weights {
            prop_assert!((crp.logp(table) - (w / total).ln()).abs() < 1e-9);
        }
    }

    #[test]
    fn crp_incorporate_unincorporate_restores(tables in seating_strategy(), table in 0usize..8) {
        let mut crp = seated(&tables, 1.5);
        let before_n = crp.n();
        let before_score = crp.logp_score();
        let before_tables = crp.tables().clone();
        let item = tables.len();
        crp.incorporate(item, table).unwrap();
        crp.unincorporate(item).unwrap();
        prop_assert_eq!(crp.n(), before_n);
        prop_assert!((crp.logp_score() - before_score).abs() < 1e-9);
        prop_assert_eq!(crp.tables(), &before_tables);
    }

    // Conjugate distribution properties
    #[test]
    fn normal_unincorporate_restores_score(xs in real_strategy(), x in -50.0f64..50.0) {
        let mut d = Normal::new();
        for v in &xs {
            d.incorporate(v);
        }
        let before = d.logp_score();
        d.incorporate(&x);
        d.unincorporate(&x);
        prop_assert!((d.logp_score() - before).abs() < 1e-6);
    }

    #[test]
    fn normal_logp_is_exchangeable(xs in real_strategy(), x in -50.0f64..50.0) {
        let mut forward = Normal::new();
        let mut backward = Normal::new();
        for v in &xs {
            forward.incorporate(v);
        }
        for v in xs.iter().rev() {
            backward.incorporate(v);
        }
        prop_assert!((forward.logp(&x) - backward.logp(&x)).abs() < 1e-6);
    }

    #[test]
    fn beta_bernoulli_unincorporate_restores_score(xs in proptest::collection::vec(any::<bool>(), 0..30)) {
        let mut d = BetaBernoulli::new();
        for v in &xs {
            d.incorporate(v);
        }
        let before = d.logp_score();
        d.incorporate(&true);
        d.unincorporate(&true);
        prop_assert!((d.logp_score() - before).abs() < 1e-9);
    }

    #[test]
    fn categorical_score_is_order_invariant(xs in proptest::collection::vec(0i64..4, 1..25)) {
        let mut forward = DirichletCategorical::new(4);
        let mut backward = DirichletCategorical::new(4);
        for v in &xs {
            forward.incorporate(v);
        }
        for v in xs.iter().rev() {
            backward.incorporate(v);
        }
        prop_assert!((forward.logp_score() - backward.logp_score()).abs() < 1e-9);
    }

    // Model properties
    #[test]
    fn irm_sweep_preserves_observations(values in proptest::collection::vec(any::<bool>(), 1..20), seed in 0u64..1000) {
        let mut schema = Schema::new();
        schema.insert(
            "R".into(),
            RelationDef::clean(&["D"], "bernoulli".parse().unwrap()),
        );
        let mut irm = Irm::new(schema).unwrap();
        let mut rng = Prng::new(seed);
        for (i, &v) in values.iter().enumerate() {
            irm.incorporate(&mut rng, "R", &[i], v.into()).unwrap();
        }
        irm.transition_cluster_assignments_all(&mut rng).unwrap();
        let relation = irm.get_relation("R").unwrap();
        prop_assert_eq!(relation.len(), values.len());
        for (i, &v) in values.iter().enumerate() {
            prop_assert_eq!(relation.get(&[i]), Some(Value::Bool(v)));
        }
        prop_assert!(irm.logp_score().is_finite());
    }
}
