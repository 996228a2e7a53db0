use std::path::Path;

use battle_engine::battle::{commit_attacks, resolve_all, BattleRegistry};
use battle_engine::bridge::Collaborators;
use battle_engine::core::load_rules;
use battle_engine::odds::{calculate, OddsSettings};
use battle_engine::scenario::Scenario;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn single_resolution(c: &mut Criterion) {
    let scenario = Scenario::from_path(Path::new("data/scenarios/ukraine_push.toml")).unwrap();
    let rules = load_rules("classic").unwrap();
    let mut seed = 0u64;
    c.bench_function("resolve ukraine push", |b| {
        b.iter(|| {
            seed += 1;
            let mut state = scenario.state.clone();
            let mut registry = BattleRegistry::new();
            let mut collaborators = Collaborators::automatic(seed);
            let mut ctx = collaborators.context(&mut state, &rules);
            commit_attacks(&mut registry, &scenario.attacks, &mut ctx).unwrap();
            black_box(resolve_all(&mut registry, &mut ctx).unwrap())
        })
    });
}

fn odds(c: &mut Criterion) {
    let scenario = Scenario::from_path(Path::new("data/scenarios/ukraine_push.toml")).unwrap();
    let rules = load_rules("classic").unwrap();
    let site = scenario.focus().unwrap();
    let settings = OddsSettings { trials: 1000, seed: 3 };
    c.bench_function("odds 1000 trials", |b| {
        b.iter(|| calculate(&scenario.state, &rules, &scenario.attacks, site, black_box(&settings)).unwrap())
    });
}

criterion_group!(benches, single_resolution, odds);
criterion_main!(benches);
