use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hirm::prelude::*;

fn block_schema() -> Schema {
    let mut schema = Schema::new();
    schema.insert(
        "likes".to_string(),
        RelationDef::clean(&["person", "movie"], "bernoulli".parse().unwrap()),
    );
    schema.insert(
        "rating".to_string(),
        RelationDef::clean(&["person", "movie"], "normal".parse().unwrap()),
    );
    schema.insert(
        "genre".to_string(),
        RelationDef::clean(&["movie"], "categorical(k=4)".parse().unwrap()),
    );
    schema
}

fn populate(hirm: &mut Hirm, rng: &mut Prng, n: usize) {
    for p in 0..n {
        for m in 0..n {
            let block = (p < n / 2) == (m < n / 2);
            hirm.incorporate(rng, "likes", &[p, m], block.into())
                .unwrap();
            let rating = if block { 4.0 } else { 1.0 } + (p + m) as f64 * 0.01;
            hirm.incorporate(rng, "rating", &[p, m], rating.into())
                .unwrap();
        }
    }
    for m in 0..n {
        hirm.incorporate(rng, "genre", &[m], ((m % 4) as i64).into())
            .unwrap();
    }
}

fn bench_gibbs_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("hirm_gibbs_sweep");

    for n in [8, 16, 32] {
        let mut rng = Prng::new(7);
        let mut hirm = Hirm::new(block_schema()).unwrap();
        populate(&mut hirm, &mut rng, n);
        let config = GibbsConfig::default();

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                hirm.transition(&mut rng, black_box(&config)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_logp(c: &mut Criterion) {
    let mut group = c.benchmark_group("hirm_logp");

    for n in [8, 16, 32] {
        let mut rng = Prng::new(7);
        let mut hirm = Hirm::new(block_schema()).unwrap();
        populate(&mut hirm, &mut rng, n);
        let query = vec![
            Observation::new("likes", vec![n, 0], true),
            Observation::new("rating", vec![n, 1], 3.5),
        ];

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| hirm.logp(&mut rng, black_box(&query)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_gibbs_sweep, bench_logp);
criterion_main!(benches);
