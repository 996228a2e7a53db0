//! Whole-turn resolution through scenarios

mod common;

use std::fs;
use std::path::Path;

use battle_engine::battle::{
    resolve_all, AttackKind, BattleKind, BattleRecord, BattleRegistry, PlannedAttack, WhoWon,
};
use battle_engine::bridge::{Collaborators, RetreatAnswer, ScriptedDice, ScriptedRemote};
use battle_engine::core::{load_rules, EngineConfig, PlayerId, RulesConfig, TerritoryId, UnitId};
use battle_engine::model::{Change, GameState, GameStateBuilder, Route};
use battle_engine::scenario::Scenario;

use common::{Harness, UKRAINE};

const BOMBER: &str = r#"
[[attacks]]
player = "Germany"
route = ["Germany", "Poland", "Ukraine", "Russia"]
units = "1 bomber"
kind = "bombing"
"#;

#[test]
fn test_scenario_attack_conquers_territory() {
    let mut scenario = Scenario::from_toml_str(UKRAINE).unwrap();
    let ukraine = scenario.state.territory_id("Ukraine").unwrap();
    let rules = RulesConfig::default();
    // armour 0 hits, armour 5 misses, infantry 5 misses
    let mut h = Harness::new(ScriptedDice::new([0, 5, 5]));
    let mut registry = BattleRegistry::new();
    let summary = h
        .resolve(&mut scenario.state, &rules, &mut registry, &scenario.attacks)
        .unwrap();

    assert_eq!(summary.battles_fought(), 1);
    assert!(registry.is_empty());
    assert_eq!(scenario.state.territory(ukraine).unwrap().owner, Some(PlayerId(0)));
    assert_eq!(scenario.state.units_of_type(ukraine, PlayerId(0), "armour").len(), 2);
    let record = &registry.records().all()[0];
    assert_eq!(record.who_won, WhoWon::Attacker);
    assert_eq!(record.defender_lost_tuv, 3);
    assert_eq!(record.attacker_lost_tuv, 0);
    assert!(h.history.mentions("1 infantry lost in Ukraine"));
}

#[test]
fn test_raid_is_fought_before_the_ground_battle() {
    let mut scenario = Scenario::from_toml_str(&format!("{}{}", UKRAINE, BOMBER)).unwrap();
    let russia = scenario.state.territory_id("Russia").unwrap();
    let rules = RulesConfig::default();
    // bombing die 2, then the ground battle as above
    let mut h = Harness::new(ScriptedDice::new([2, 0, 5, 5]));
    let mut registry = BattleRegistry::new();
    let summary = h
        .resolve(&mut scenario.state, &rules, &mut registry, &scenario.attacks)
        .unwrap();

    let kinds: Vec<BattleKind> = summary.fought.iter().map(|f| f.kind).collect();
    assert_eq!(kinds, vec![BattleKind::BombingRaid, BattleKind::Normal]);
    assert_eq!(scenario.state.player(PlayerId(1)).unwrap().pus, 17);
    assert_eq!(registry.bombing_damage(russia), 3);
    // a raid never changes ownership
    assert_eq!(scenario.state.territory(russia).unwrap().owner, Some(PlayerId(1)));
}

#[test]
fn test_lost_connection_resumes_the_turn() {
    let mut scenario = Scenario::from_toml_str(UKRAINE).unwrap();
    let ukraine = scenario.state.territory_id("Ukraine").unwrap();
    let rules = RulesConfig {
        engine: EngineConfig {
            remote_retry_limit: Some(0),
            ..Default::default()
        },
        ..RulesConfig::default()
    };
    let mut h = Harness::new(ScriptedDice::new([0, 5, 5]));
    h.dice.drop_next(1);
    let mut registry = BattleRegistry::new();
    let err = h
        .resolve(&mut scenario.state, &rules, &mut registry, &scenario.attacks)
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(registry.len(), 1);

    let summary = {
        let mut ctx = h.ctx(&mut scenario.state, &rules);
        resolve_all(&mut registry, &mut ctx).unwrap()
    };
    assert_eq!(summary.battles_fought(), 1);
    assert_eq!(scenario.state.territory(ukraine).unwrap().owner, Some(PlayerId(0)));
    assert_eq!(h.dice.remaining(), 0);
}

fn bundled_scenarios() -> Vec<Scenario> {
    let mut paths: Vec<_> = fs::read_dir(Path::new("data/scenarios"))
        .expect("scenario directory")
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().map(|x| x == "toml").unwrap_or(false))
        .collect();
    paths.sort();
    assert!(!paths.is_empty());
    paths
        .iter()
        .map(|p| Scenario::from_path(p).unwrap_or_else(|e| panic!("{:?}: {}", p, e)))
        .collect()
}

#[test]
fn test_bundled_scenarios_load() {
    for scenario in bundled_scenarios() {
        assert!(!scenario.attacks.is_empty(), "{}", scenario.name);
        assert!(scenario.focus().is_some());
        let rules = scenario.rules.as_deref().unwrap_or("classic");
        assert!(load_rules(rules).is_ok(), "{}", rules);
    }
}

#[test]
fn test_bundled_scenarios_resolve_completely() {
    for scenario in bundled_scenarios() {
        let rules = load_rules(scenario.rules.as_deref().unwrap_or("classic")).unwrap();
        for seed in 0..5 {
            let mut state = scenario.state.clone();
            let mut registry = BattleRegistry::new();
            let mut collaborators = Collaborators::automatic(seed);
            {
                let mut ctx = collaborators.context(&mut state, &rules);
                battle_engine::battle::commit_attacks(&mut registry, &scenario.attacks, &mut ctx).unwrap();
                resolve_all(&mut registry, &mut ctx).unwrap();
            }
            assert!(registry.is_empty(), "{} seed {}", scenario.name, seed);
            assert!(registry
                .records()
                .all()
                .iter()
                .all(|r| r.who_won != WhoWon::NotFinished));
        }
    }
}

/// Two USA infantry already ashore in Normandy from a transport in the
/// Channel, with `escorts` destroyers beside it. `navy` is the German fleet
/// in the Channel and `guards` the German infantry in Normandy.
fn normandy(navy: &[(u32, &str)], escorts: u32, guards: u32) -> (GameState, UnitId, Vec<UnitId>) {
    let mut b = GameStateBuilder::classic()
        .player("USA", 0)
        .player("Germany", 0)
        .sea("North Sea")
        .sea("Channel")
        .land("Normandy", Some("Germany"), 2)
        .land("Belgium", Some("USA"), 2)
        .connect("North Sea", "Channel")
        .connect("Channel", "Normandy")
        .connect("Belgium", "Normandy")
        .units("Channel", "USA", 1, "transport")
        .units("Channel", "USA", escorts, "destroyer")
        .units("Normandy", "USA", 2, "infantry")
        .units("Normandy", "Germany", guards, "infantry");
    for &(n, t) in navy {
        b = b.units("Channel", "Germany", n, t);
    }
    let mut state = b.build().unwrap();
    let channel = state.territory_id("Channel").unwrap();
    let normandy = state.territory_id("Normandy").unwrap();
    let transport = state.units_of_type(channel, PlayerId(0), "transport")[0];
    let infantry = state.units_of_type(normandy, PlayerId(0), "infantry");
    state
        .apply(&Change::transported_by(&state, &infantry, Some(transport)))
        .unwrap();
    (state, transport, infantry)
}

/// The fleet sails into the Channel, then the infantry storms the beach
fn landing(state: &GameState, infantry: &[UnitId]) -> Vec<PlannedAttack> {
    let north = state.territory_id("North Sea").unwrap();
    let channel = state.territory_id("Channel").unwrap();
    let normandy = state.territory_id("Normandy").unwrap();
    let fleet: Vec<UnitId> = state
        .units_in(channel)
        .into_iter()
        .filter(|&u| state.owner_of(u) == Some(PlayerId(0)))
        .collect();
    vec![
        PlannedAttack {
            route: Route::new(north, vec![channel]),
            units: fleet,
            player: PlayerId(0),
            kind: AttackKind::Ground,
        },
        PlannedAttack {
            route: Route::new(channel, vec![normandy]),
            units: infantry.to_vec(),
            player: PlayerId(0),
            kind: AttackKind::Ground,
        },
    ]
}

fn record_at(registry: &BattleRegistry, site: TerritoryId) -> &BattleRecord {
    registry
        .records()
        .all()
        .iter()
        .find(|r| r.site == site)
        .expect("a record for the site")
}

#[test]
fn test_sunk_transport_takes_landed_cargo_down_with_it() {
    let (mut state, transport, infantry) = normandy(&[(1, "destroyer")], 0, 1);
    let channel = state.territory_id("Channel").unwrap();
    let normandy = state.territory_id("Normandy").unwrap();
    let attacks = landing(&state, &infantry);
    let rules = RulesConfig {
        max_battle_rounds: 3,
        ..RulesConfig::default()
    };
    // the destroyer sinks the transport with its first die
    let mut h = Harness::new(ScriptedDice::new([0]).then_always(5));
    let mut registry = BattleRegistry::new();
    let summary = h.resolve(&mut state, &rules, &mut registry, &attacks).unwrap();

    let kinds: Vec<BattleKind> = summary.fought.iter().map(|f| f.kind).collect();
    assert_eq!(kinds, vec![BattleKind::Normal]);
    assert!(registry.is_empty());
    assert_eq!(state.location_of(transport), None);
    assert!(infantry.iter().all(|&u| state.location_of(u).is_none()));
    assert_eq!(state.territory(normandy).unwrap().owner, Some(PlayerId(1)));
    assert_eq!(state.units_of_type(normandy, PlayerId(1), "infantry").len(), 1);

    // the sea battle pays for the drowned infantry, the beach pays nothing
    let naval = record_at(&registry, channel);
    assert_eq!(naval.who_won, WhoWon::Defender);
    assert_eq!(naval.attacker_lost_tuv, 13);
    let beach = record_at(&registry, normandy);
    assert_eq!(beach.who_won, WhoWon::Defender);
    assert_eq!(beach.attacker_lost_tuv, 0);
    assert_eq!(beach.defender_lost_tuv, 0);
    assert!(h.history.mentions("2 infantry lost in Normandy"));
    assert_eq!(h.dice.requests.len(), 1);
}

#[test]
fn test_won_sea_battle_releases_landed_cargo() {
    let (mut state, transport, infantry) = normandy(&[(1, "transport")], 1, 1);
    let channel = state.territory_id("Channel").unwrap();
    let normandy = state.territory_id("Normandy").unwrap();
    let attacks = landing(&state, &infantry);
    let rules = RulesConfig {
        max_battle_rounds: 3,
        ..RulesConfig::default()
    };
    let mut h = Harness::new(ScriptedDice::always(0));
    let mut registry = BattleRegistry::new();
    h.resolve(&mut state, &rules, &mut registry, &attacks).unwrap();

    assert_eq!(record_at(&registry, channel).who_won, WhoWon::Attacker);
    assert_eq!(state.location_of(transport), Some(channel));
    // both beach dice hit, the German infantry takes one landing unit with it
    assert_eq!(record_at(&registry, normandy).who_won, WhoWon::Attacker);
    assert_eq!(state.territory(normandy).unwrap().owner, Some(PlayerId(0)));
    let ashore = state.units_of_type(normandy, PlayerId(0), "infantry");
    assert_eq!(ashore.len(), 1);
    let unit = state.unit(ashore[0]).unwrap();
    assert_eq!(unit.transported_by, None);
    assert_eq!(unit.unloaded_to, Some(normandy));
    assert!(unit.was_amphibious);
}

#[test]
fn test_partial_amphibious_retreat_leaves_the_landing_behind() {
    let mut state = GameStateBuilder::classic()
        .player("USA", 0)
        .player("Germany", 0)
        .sea("Channel")
        .land("Normandy", Some("Germany"), 2)
        .land("Belgium", Some("USA"), 2)
        .connect("Channel", "Normandy")
        .connect("Belgium", "Normandy")
        .units("Channel", "USA", 1, "transport")
        .units("Normandy", "USA", 1, "infantry")
        .units("Normandy", "USA", 1, "armour")
        .units("Normandy", "Germany", 3, "infantry")
        .build()
        .unwrap();
    let channel = state.territory_id("Channel").unwrap();
    let normandy = state.territory_id("Normandy").unwrap();
    let belgium = state.territory_id("Belgium").unwrap();
    let transport = state.units_of_type(channel, PlayerId(0), "transport")[0];
    let infantry = state.units_of_type(normandy, PlayerId(0), "infantry");
    let armour = state.units_of_type(normandy, PlayerId(0), "armour");
    state
        .apply(&Change::transported_by(&state, &infantry, Some(transport)))
        .unwrap();
    let attacks = vec![
        PlannedAttack {
            route: Route::new(channel, vec![normandy]),
            units: infantry.clone(),
            player: PlayerId(0),
            kind: AttackKind::Ground,
        },
        PlannedAttack {
            route: Route::new(belgium, vec![normandy]),
            units: armour.clone(),
            player: PlayerId(0),
            kind: AttackKind::Ground,
        },
    ];
    let rules = RulesConfig {
        partial_amphibious_retreat: true,
        max_battle_rounds: 3,
        ..RulesConfig::default()
    };
    let mut h = Harness::new(ScriptedDice::always(5));
    h.remote = ScriptedRemote::new().retreat(RetreatAnswer::To(belgium));
    let mut registry = BattleRegistry::new();
    h.resolve(&mut state, &rules, &mut registry, &attacks).unwrap();

    // only the armour is offered the way back, and only once
    assert_eq!(h.remote.asked.len(), 1);
    assert_eq!(h.remote.asked[0].1, vec![belgium]);
    assert!(state.is_in(armour[0], belgium));
    assert!(state.is_in(infantry[0], normandy));
    assert!(state.unit(infantry[0]).unwrap().was_amphibious);
    assert!(!state.unit(armour[0]).unwrap().was_amphibious);
    let record = record_at(&registry, normandy);
    assert_eq!(record.who_won, WhoWon::Draw);
    assert_eq!(record.rounds, 3);
    assert_eq!(state.territory(normandy).unwrap().owner, Some(PlayerId(1)));
}
