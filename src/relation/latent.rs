//! Gibbs moves on the values of unobserved relations.
//!
//! A latent value at items `x` is scored by its own relation's predictive plus
//! the emission log-probability of every noisy observation whose leading items
//! are `x`. The relations involved may live in different IRMs, so each one is
//! paired with the domains it is clustered by.

use super::{Domains, Items, Relation, RelationVariant};
use crate::error::{HirmError, Result};
use crate::math::log_choice;
use crate::observation::{ObservationType, ValueKind};
use crate::prng::Prng;

/// A relation together with the domains that cluster its items.
pub(crate) struct Scoped<'a> {
    pub domains: &'a Domains,
    pub relation: &'a mut RelationVariant,
}

/// Resample every value of `base` given the noisy relations in `dependents`.
///
/// After the value sweep, non-conjugate cells of `base` take `theta_steps`
/// parameter moves. Observed relations skip the sweep.
pub(crate) fn transition_latent_values(
    rng: &mut Prng,
    base: Scoped<'_>,
    dependents: Vec<Scoped<'_>>,
    theta_steps: usize,
) -> Result<()> {
    if base.relation.is_observed() {
        base.relation.transition_thetas(rng, theta_steps);
        return Ok(());
    }
    match base.relation.value_kind() {
        ValueKind::Bool => typed::<bool>(rng, base, dependents, theta_steps),
        ValueKind::Int => typed::<i64>(rng, base, dependents, theta_steps),
        ValueKind::Real => typed::<f64>(rng, base, dependents, theta_steps),
        ValueKind::Text => typed::<String>(rng, base, dependents, theta_steps),
    }
}

fn unwrap_typed<'a, T: ObservationType>(
    relation: &'a mut RelationVariant,
) -> Result<&'a mut Relation<T>> {
    let (name, kind) = (relation.name().to_string(), relation.value_kind());
    T::relation_mut(relation).ok_or(HirmError::TypeMismatch {
        relation: name,
        expected: T::KIND,
        actual: kind,
    })
}

fn typed<T: ObservationType>(
    rng: &mut Prng,
    base: Scoped<'_>,
    dependents: Vec<Scoped<'_>>,
    theta_steps: usize,
) -> Result<()> {
    let base_domains = base.domains;
    let relation = unwrap_typed::<T>(base.relation)?;
    let mut deps: Vec<(&Domains, &mut Relation<T>)> = Vec::with_capacity(dependents.len());
    for dep in dependents {
        deps.push((dep.domains, unwrap_typed::<T>(dep.relation)?));
    }

    let keys: Vec<Items> = relation.entries().map(|(items, _)| items.clone()).collect();
    for items in keys {
        resample_value(rng, base_domains, relation, &mut deps, &items)?;
    }
    relation.transition_thetas(rng, theta_steps);
    Ok(())
}

fn resample_value<T: ObservationType>(
    rng: &mut Prng,
    base_domains: &Domains,
    relation: &mut Relation<T>,
    deps: &mut [(&Domains, &mut Relation<T>)],
    items: &[usize],
) -> Result<()> {
    let Some(entry) = relation.entry(items).cloned() else {
        return Ok(());
    };
    let touching: Vec<Vec<Items>> = deps
        .iter()
        .map(|(_, dep)| dep.tuples_with_prefix(items))
        .collect();

    let mut candidates = match T::support() {
        Some(support) => support,
        None => {
            let mut proposals = Vec::new();
            for ((domains, dep), tuples) in deps.iter().zip(&touching) {
                if let Some(p) = dep.propose_clean(rng, domains, tuples)? {
                    push_distinct(&mut proposals, p, &entry.value);
                }
            }
            proposals
        }
    };

    relation.detach(base_domains, items, false)?;
    for ((domains, dep), tuples) in deps.iter_mut().zip(&touching) {
        for t in tuples {
            dep.detach(domains, t, false)?;
        }
    }

    if T::support().is_none() {
        let draw = relation.sample_value(rng, base_domains, items, entry.base.as_ref())?;
        push_distinct(&mut candidates, draw, &entry.value);
        // Keep the current value in play so a poor proposal never forces a move.
        candidates.push(entry.value.clone());
    }

    let mut scores = Vec::with_capacity(candidates.len());
    for candidate in &candidates {
        let mut lp = relation.logp(rng, base_domains, items, candidate, entry.base.as_ref())?;
        for ((domains, dep), tuples) in deps.iter().zip(&touching) {
            lp += dep.dependents_logp(domains, tuples, candidate)?;
        }
        scores.push(lp);
    }

    let chosen = if scores.iter().any(|s| s.is_finite()) {
        candidates[log_choice(&scores, rng)].clone()
    } else {
        tracing::warn!(
            relation = relation.name(),
            ?items,
            "no candidate latent value has finite probability, keeping current"
        );
        entry.value.clone()
    };

    relation.set_value(items, chosen.clone());
    relation.attach(rng, base_domains, items)?;
    for ((domains, dep), tuples) in deps.iter_mut().zip(&touching) {
        for t in tuples {
            dep.set_base(t, chosen.clone());
            dep.attach(rng, domains, t)?;
        }
    }
    Ok(())
}

fn push_distinct<T: PartialEq>(candidates: &mut Vec<T>, value: T, current: &T) {
    if &value != current && !candidates.contains(&value) {
        candidates.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use crate::schema::RelationDef;

    fn one_domain(n: usize) -> Domains {
        let mut rng = Prng::new(0);
        let mut d = Domain::new("D");
        for item in 0..n {
            d.incorporate(&mut rng, item, Some(0)).unwrap();
        }
        let mut domains = Domains::new();
        domains.insert("D".into(), d);
        domains
    }

    #[test]
    fn test_observed_base_untouched() {
        let domains = one_domain(1);
        let mut rng = Prng::new(3);
        let mut base = RelationVariant::new(
            "B",
            RelationDef::clean(&["D"], "bernoulli".parse().unwrap()),
        )
        .unwrap();
        base.incorporate(&mut rng, &domains, &[0], &true.into(), None)
            .unwrap();
        transition_latent_values(
            &mut rng,
            Scoped { domains: &domains, relation: &mut base },
            Vec::new(),
            1,
        )
        .unwrap();
        assert_eq!(base.get(&[0]), Some(true.into()));
    }

    #[test]
    fn test_latent_bool_follows_noisy_evidence() {
        let domains = one_domain(2);
        let mut many = one_domain(20);
        many.insert("E".into(), many["D"].clone());
        let mut rng = Prng::new(11);
        let mut base = RelationVariant::new(
            "B",
            RelationDef::clean(&["D"], "bernoulli".parse().unwrap()).with_observed(false),
        )
        .unwrap();
        let mut noisy = RelationVariant::new(
            "N",
            RelationDef::noisy(&["D", "E"], "bitflip".parse().unwrap(), "B"),
        )
        .unwrap();
        base.incorporate(&mut rng, &domains, &[0], &false.into(), None)
            .unwrap();
        base.incorporate(&mut rng, &domains, &[1], &true.into(), None)
            .unwrap();
        for j in 0..20 {
            noisy
                .incorporate(&mut rng, &many, &[1, j], &true.into(), Some(&true.into()))
                .unwrap();
        }
        for j in 0..10 {
            noisy
                .incorporate(&mut rng, &many, &[0, j], &true.into(), Some(&false.into()))
                .unwrap();
        }
        for _ in 0..3 {
            transition_latent_values(
                &mut rng,
                Scoped { domains: &domains, relation: &mut base },
                vec![Scoped { domains: &many, relation: &mut noisy }],
                0,
            )
            .unwrap();
            for item in 0..2 {
                assert_eq!(noisy.entry(&[item, 0]).unwrap().1, base.get(&[item]));
            }
        }
        assert_eq!(base.get(&[0]), Some(true.into()));
        assert_eq!(noisy.len(), 30);
        assert_eq!(noisy.num_cells(), 1);
    }

    #[test]
    fn test_latent_real_moves_towards_observations() {
        let domains = one_domain(1);
        let mut rng = Prng::new(5);
        let mut base = RelationVariant::new(
            "B",
            RelationDef::clean(&["D"], "normal".parse().unwrap()).with_observed(false),
        )
        .unwrap();
        let mut noisy = RelationVariant::new(
            "N",
            RelationDef::noisy(&["D", "D"], "gaussian".parse().unwrap(), "B"),
        )
        .unwrap();
        let many = one_domain(10);
        base.incorporate(&mut rng, &domains, &[0], &0.0.into(), None)
            .unwrap();
        for j in 0..10 {
            let dirty = 5.0 + 0.01 * j as f64;
            noisy
                .incorporate(&mut rng, &many, &[0, j], &dirty.into(), Some(&0.0.into()))
                .unwrap();
        }
        let before = base.logp_score() + noisy.logp_score();
        for _ in 0..5 {
            transition_latent_values(
                &mut rng,
                Scoped { domains: &domains, relation: &mut base },
                vec![Scoped { domains: &many, relation: &mut noisy }],
                0,
            )
            .unwrap();
        }
        let Some(crate::observation::Value::Real(x)) = base.get(&[0]) else {
            panic!("latent value missing");
        };
        assert!(x > 2.0, "latent value {x} ignored the noisy observations");
        assert!(base.logp_score() + noisy.logp_score() > before);
    }
}
