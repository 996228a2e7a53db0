//! Odds calculator over the bundled scenarios

use std::path::Path;

use battle_engine::core::load_rules;
use battle_engine::odds::{calculate, OddsSettings};
use battle_engine::scenario::Scenario;

#[test]
fn test_ukraine_push_odds_are_reproducible() {
    let scenario = Scenario::from_path(Path::new("data/scenarios/ukraine_push.toml")).unwrap();
    let rules = load_rules("classic").unwrap();
    let site = scenario.focus().unwrap();
    let settings = OddsSettings { trials: 100, seed: 11 };

    let first = calculate(&scenario.state, &rules, &scenario.attacks, site, &settings).unwrap();
    let second = calculate(&scenario.state, &rules, &scenario.attacks, site, &settings).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.attacker_wins + first.defender_wins + first.draws, 100);
    let ratios = first.attacker_win_ratio() + first.defender_win_ratio() + first.draw_ratio();
    assert!((ratios - 1.0).abs() < 1e-9);
    // the scenario's own state is never touched
    assert_eq!(scenario.state, Scenario::from_path(Path::new("data/scenarios/ukraine_push.toml")).unwrap().state);
}

#[test]
fn test_different_seeds_usually_differ() {
    let scenario = Scenario::from_path(Path::new("data/scenarios/ukraine_push.toml")).unwrap();
    let rules = load_rules("classic").unwrap();
    let site = scenario.focus().unwrap();
    let a = calculate(&scenario.state, &rules, &scenario.attacks, site, &OddsSettings { trials: 200, seed: 1 }).unwrap();
    let b = calculate(&scenario.state, &rules, &scenario.attacks, site, &OddsSettings { trials: 200, seed: 5000 }).unwrap();
    assert!(a.average_rounds > 0.0 && b.average_rounds > 0.0);
    assert!(a.average_attacker_tuv_lost != b.average_attacker_tuv_lost || a.average_defender_tuv_lost != b.average_defender_tuv_lost);
}
