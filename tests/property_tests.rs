//! Property tests over randomly sized armies and dice seeds

mod common;

use battle_engine::battle::{AttackKind, BattleKind, BattleRegistry, WhoWon};
use battle_engine::bridge::{Collaborators, ScriptedDice};
use battle_engine::core::{BattleError, PlayerId, RulesConfig, TerritoryId};
use battle_engine::model::{Change, GameState, GameStateBuilder, Route};
use proptest::prelude::*;

use common::Harness;

/// `armour` German tanks already in Ukraine against `infantry` Russians
fn ukraine(armour: u32, infantry: u32) -> (GameState, TerritoryId, TerritoryId) {
    let mut state = GameStateBuilder::classic()
        .player("Germany", 0)
        .player("Russia", 12)
        .land("Poland", Some("Germany"), 2)
        .land("Ukraine", Some("Russia"), 2)
        .land("Belorussia", Some("Russia"), 1)
        .connect("Poland", "Ukraine")
        .connect("Poland", "Belorussia")
        .units("Poland", "Germany", armour, "armour")
        .units("Ukraine", "Russia", infantry, "infantry")
        .units("Belorussia", "Russia", 1, "infantry")
        .build()
        .unwrap();
    let poland = state.territory_id("Poland").unwrap();
    let ukraine = state.territory_id("Ukraine").unwrap();
    let tanks = state.units_of_type(poland, PlayerId(0), "armour");
    state.apply(&Change::move_units(poland, ukraine, &tanks)).unwrap();
    (state, poland, ukraine)
}

fn attack(state: &GameState, from: TerritoryId, to: TerritoryId, kind: AttackKind) -> battle_engine::battle::PlannedAttack {
    battle_engine::battle::PlannedAttack {
        route: Route::new(from, vec![to]),
        units: state
            .units_in(to)
            .into_iter()
            .filter(|&u| state.owner_of(u) == Some(PlayerId(0)))
            .collect(),
        player: PlayerId(0),
        kind,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every unit that leaves the board is charged to exactly one side
    #[test]
    fn prop_losses_match_the_board(armour in 1u32..6, infantry in 1u32..6, seed in any::<u64>()) {
        let (mut state, poland, site) = ukraine(armour, infantry);
        let attacks = vec![attack(&state, poland, site, AttackKind::Ground)];
        let rules = RulesConfig::default();
        let mut registry = BattleRegistry::new();
        let mut collaborators = Collaborators::automatic(seed);
        {
            let mut ctx = collaborators.context(&mut state, &rules);
            battle_engine::battle::commit_attacks(&mut registry, &attacks, &mut ctx).unwrap();
            battle_engine::battle::resolve_all(&mut registry, &mut ctx).unwrap();
        }
        let tanks_left = state.units_of_type(site, PlayerId(0), "armour").len() as u32;
        let infantry_left = state.units_of_type(site, PlayerId(1), "infantry").len() as u32;
        let record = &registry.records().all()[0];
        prop_assert_eq!(record.attacker_lost_tuv, 5 * (armour - tanks_left));
        prop_assert_eq!(record.defender_lost_tuv, 3 * (infantry - infantry_left));
        match record.who_won {
            WhoWon::Attacker => {
                prop_assert_eq!(infantry_left, 0);
                prop_assert!(tanks_left > 0);
                prop_assert_eq!(state.territory(site).unwrap().owner, Some(PlayerId(0)));
            }
            WhoWon::Defender => {
                prop_assert_eq!(tanks_left, 0);
                prop_assert_eq!(state.territory(site).unwrap().owner, Some(PlayerId(1)));
            }
            other => prop_assert!(false, "unexpected result {:?}", other),
        }
    }

    /// A round limit always ends the battle within that many rounds
    #[test]
    fn prop_round_limit_terminates(limit in 1u32..5, armour in 1u32..4, infantry in 1u32..4, seed in any::<u64>()) {
        let (mut state, poland, site) = ukraine(armour, infantry);
        let attacks = vec![attack(&state, poland, site, AttackKind::Ground)];
        let rules = RulesConfig { max_battle_rounds: limit, ..RulesConfig::default() };
        let mut registry = BattleRegistry::new();
        let mut collaborators = Collaborators::automatic(seed);
        {
            let mut ctx = collaborators.context(&mut state, &rules);
            battle_engine::battle::commit_attacks(&mut registry, &attacks, &mut ctx).unwrap();
            battle_engine::battle::resolve_all(&mut registry, &mut ctx).unwrap();
        }
        prop_assert!(registry.is_empty());
        let record = &registry.records().all()[0];
        prop_assert!(record.rounds <= limit);
        if record.who_won == WhoWon::Draw {
            prop_assert_eq!(record.rounds, limit);
        }
    }

    /// Capturing a territory a second time changes nothing
    #[test]
    fn prop_take_over_is_idempotent(pus in 0u32..100, capital in any::<bool>()) {
        let (mut state, _, site) = ukraine(1, 0);
        state.player_mut(PlayerId(1)).unwrap().pus = pus;
        if capital {
            state.territory_mut(site).unwrap().capital_of = Some(PlayerId(1));
        }
        let rules = RulesConfig::default();
        let mut h = Harness::new(ScriptedDice::always(0));
        let mut registry = BattleRegistry::new();
        let mut ctx = h.ctx(&mut state, &rules);
        registry.take_over(site, PlayerId(0), &[], &mut ctx).unwrap();
        let after_first = ctx.state.clone();
        let second = registry.take_over(site, PlayerId(0), &[], &mut ctx).unwrap();
        prop_assert!(second.is_empty());
        prop_assert_eq!(&state, &after_first);
        prop_assert_eq!(state.territory(site).unwrap().owner, Some(PlayerId(0)));
    }

    /// Fighting a blocked battle is refused and leaves the state alone
    #[test]
    fn prop_blocked_fight_changes_nothing(armour in 1u32..4, infantry in 1u32..4) {
        let (mut state, poland, site) = ukraine(armour, infantry);
        let belorussia = state.territory_id("Belorussia").unwrap();
        let rules = RulesConfig::default();
        let mut h = Harness::new(ScriptedDice::always(0));
        let mut registry = BattleRegistry::new();
        let ukraine_attack = attack(&state, poland, site, AttackKind::Ground);
        let spawned = {
            let infantry_type = state.unit_type_id("infantry").unwrap();
            state.spawn_unit(infantry_type, PlayerId(0), belorussia).unwrap()
        };
        let belorussia_attack = battle_engine::battle::PlannedAttack {
            route: Route::new(poland, vec![belorussia]),
            units: vec![spawned],
            player: PlayerId(0),
            kind: AttackKind::Ground,
        };
        {
            let mut ctx = h.ctx(&mut state, &rules);
            battle_engine::battle::commit_attacks(&mut registry, &[ukraine_attack, belorussia_attack], &mut ctx).unwrap();
        }
        let blocked = registry.pending(site, BattleKind::Normal).unwrap();
        let blocking = registry.pending(belorussia, BattleKind::Normal).unwrap();
        registry.add_dependency(blocked, blocking);
        let before = state.clone();
        let err = {
            let mut ctx = h.ctx(&mut state, &rules);
            registry.fight_battle(blocked, &mut ctx).unwrap_err()
        };
        let is_blocked = matches!(err, BattleError::BattleBlocked { battle, ref blocking } if battle == blocked && blocking.len() == 1);
        prop_assert!(is_blocked);
        prop_assert_eq!(&state, &before);
        prop_assert_eq!(registry.len(), 2);
        prop_assert!(h.dice.requests.is_empty());
    }
}
