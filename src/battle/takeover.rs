//! Conquest of a territory after a won or uncontested attack

use crate::battle::common::{BattleResultDescription, WhoWon};
use crate::battle::records::BattleOutcome;
use crate::battle::registry::{record_change, BattleRegistry};
use crate::bridge::{BattleContext, BattleNotice, CaptureKind};
use crate::core::error::{BattleError, Result};
use crate::core::types::{PlayerId, TerritoryId, UnitId};
use crate::model::{matches, Change, CompositeChange, GameState, UnitFlag};

impl BattleRegistry {
    /// Hand `site` to `player` (or whoever it rightfully goes to) and settle
    /// everything that follows from the capture.
    ///
    /// Applies each change as it is made and returns them all. Taking over a
    /// territory already held by `player` changes nothing but combat flags.
    pub fn take_over(
        &mut self,
        site: TerritoryId,
        player: PlayerId,
        arriving: &[UnitId],
        ctx: &mut BattleContext<'_>,
    ) -> Result<CompositeChange> {
        let mut applied = CompositeChange::new();
        let territory = ctx.state.territory(site)?.clone();
        let owner = territory.owner;
        let owner_is_enemy = ctx.state.is_enemy_territory(site, player);

        if territory.is_water && !arriving.is_empty() && !can_control_sea(ctx, arriving) {
            return Ok(applied);
        }

        if territory.is_convoy_route() {
            let fed: Vec<String> = territory
                .convoy_for
                .iter()
                .map(|&t| ctx.state.territory_name(t))
                .collect();
            ctx.add_history(
                &format!(
                    "{} gains control of the convoy route to {}",
                    ctx.state.player_name(player),
                    fed.join(", ")
                ),
                &[],
            );
        }

        // entering neutral land costs money
        if owner.is_none() && !territory.is_water {
            if let Some(charge) = ctx.rules.neutral_charge() {
                let pus = ctx.state.player(player)?.pus;
                let paid = charge.min(pus);
                record_change(&mut applied, ctx, Change::resources(player, -(paid as i64)))?;
                ctx.add_history(
                    &format!(
                        "{} loses {} PUs for violating {}'s neutrality",
                        ctx.state.player_name(player),
                        paid,
                        territory.name
                    ),
                    &[],
                );
            }
        }

        if let Some(whose) = territory.capital_of {
            let retain = ctx.state.player(whose)?.retain_capital_number as usize;
            let still_owned = ctx.state.capitals_owned_by(whose).len();
            if retain < still_owned {
                ctx.add_history(
                    &format!(
                        "{} captures one of {}'s capitals",
                        ctx.state.player_name(player),
                        ctx.state.player_name(whose)
                    ),
                    &[],
                );
            } else if owner == Some(whose) {
                let treasury = ctx.state.player(whose)?;
                let (captured, destroys) = (treasury.pus as i64, treasury.destroys_pus);
                record_change(&mut applied, ctx, Change::resources(whose, -captured))?;
                if destroys {
                    ctx.add_history(
                        &format!(
                            "{} destroys {} PUs of {}",
                            ctx.state.player_name(player),
                            captured,
                            ctx.state.player_name(whose)
                        ),
                        &[],
                    );
                } else {
                    record_change(&mut applied, ctx, Change::resources(player, captured))?;
                    ctx.add_history(
                        &format!(
                            "{} captures {} PUs from {}",
                            ctx.state.player_name(player),
                            captured,
                            ctx.state.player_name(whose)
                        ),
                        &[],
                    );
                }
            }
        }

        let mut new_owner = player;
        if owner_is_enemy {
            if let Some(orig) = territory.original_owner {
                if ctx.state.is_allied(orig, player) && Some(orig) != owner && orig != player {
                    if liberates_to_original_owner(ctx.state, orig, site) {
                        new_owner = orig;
                    }
                }
            }
        }
        if owner_is_enemy && new_owner == player {
            if let Some(&(_, receiver)) = territory
                .captured_goes_to
                .iter()
                .find(|(capturer, _)| *capturer == player)
            {
                new_owner = receiver;
            }
        }

        if owner_is_enemy {
            let change = Change::territory_owner(ctx.state, site, Some(new_owner))?;
            if !change.is_noop() {
                record_change(&mut applied, ctx, change)?;
                let kind = if territory.is_water {
                    CaptureKind::Sea
                } else if territory.capital_of.is_some() {
                    CaptureKind::Capital
                } else if self.was_blitzed(site) && ctx.state.any(arriving, matches::can_blitz) {
                    CaptureKind::Blitz
                } else {
                    CaptureKind::Land
                };
                tracing::info!(
                    site = %territory.name,
                    player = %ctx.state.player_name(new_owner),
                    ?kind,
                    "territory captured"
                );
                ctx.add_history(
                    &format!(
                        "{} takes {} from {}",
                        ctx.state.player_name(new_owner),
                        territory.name,
                        owner.map(|o| ctx.state.player_name(o)).unwrap_or_else(|| "Neutral".into())
                    ),
                    &[],
                );
                ctx.notify(BattleNotice::Capture {
                    territory: site,
                    player: new_owner,
                    kind,
                });
            }
        }

        // bombing raids must already be resolved before anyone conquers their target
        let damageable_enemy = ctx
            .state
            .enemy_units_in(site, player)
            .into_iter()
            .any(|u| ctx.state.matches(u, matches::can_be_damaged));
        if damageable_enemy {
            if let Some(raid) = self.pending_bombing(site) {
                if let Ok(battle) = self.battle_mut(raid) {
                    battle.as_ops_mut().cancel(ctx);
                    let defender = battle.core().defender;
                    self.records_mut().add_result(
                        raid,
                        BattleOutcome {
                            defender,
                            result: BattleResultDescription::NoBattle,
                            who_won: WhoWon::Draw,
                            attacker_lost_tuv: 0,
                            defender_lost_tuv: 0,
                            rounds: 0,
                        },
                    );
                }
                self.remove_battle(raid);
                return Err(BattleError::invariant(
                    "Bombing Raids should be dealt with first! Be sure the battle has dependencies set correctly!",
                ));
            }
        }

        capture_or_destroy_units(&mut applied, site, player, new_owner, ctx)?;

        if let Some(orig) = territory.original_owner {
            if territory.capital_of == Some(orig) && ctx.state.is_allied(orig, player) {
                restore_original_holdings(&mut applied, orig, ctx)?;
            }
        }

        let mut fought: Vec<UnitId> = arriving.to_vec();
        if territory.is_water {
            fought.retain(|&u| !ctx.state.matches(u, matches::is_land));
        }
        let change = Change::flag(ctx.state, &fought, UnitFlag::WasInCombat, true);
        record_change(&mut applied, ctx, change)?;

        Ok(applied)
    }
}

/// Arrivals able to hold a sea zone, not counting cargo, aircraft or
/// submerged boats
fn can_control_sea(ctx: &BattleContext<'_>, arriving: &[UnitId]) -> bool {
    let rules = ctx.rules;
    arriving.iter().any(|&u| {
        ctx.state.matches(u, |unit, t| {
            if matches::is_land(unit, t) || matches::is_air(unit, t) || matches::is_submerged(unit, t) {
                return false;
            }
            if !rules.transport_control_sea_zone() && matches::is_defenseless_transport(unit, t) {
                return false;
            }
            if rules.sub_control_sea_zone_restricted() && matches::is_sub(unit, t) {
                return false;
            }
            true
        })
    })
}

/// An allied original owner gets its land back while it still has a
/// capital to run it from
fn liberates_to_original_owner(state: &GameState, orig: PlayerId, site: TerritoryId) -> bool {
    if !state.capitals_owned_by(orig).is_empty() {
        return true;
    }
    state.original_capitals(orig).iter().any(|&c| {
        c == site
            || state
                .territory(c)
                .map(|t| t.owner.is_none())
                .unwrap_or(false)
    })
}

fn capture_or_destroy_units(
    applied: &mut CompositeChange,
    site: TerritoryId,
    player: PlayerId,
    new_owner: PlayerId,
    ctx: &mut BattleContext<'_>,
) -> Result<()> {
    if ctx.rules.units_destroyed_instead_of_captured() {
        let destroyed: Vec<UnitId> = ctx
            .state
            .enemy_units_in(site, player)
            .into_iter()
            .filter(|&u| ctx.state.matches(u, |_, t| t.destroyed_when_captured))
            .collect();
        if !destroyed.is_empty() {
            ctx.add_history("Some non-combat units are destroyed", &destroyed);
            record_change(applied, ctx, Change::remove_units(site, &destroyed))?;
        }
    }

    let captured: Vec<UnitId> = ctx
        .state
        .enemy_units_in(site, player)
        .into_iter()
        .filter(|&u| {
            ctx.state
                .matches(u, |unit, t| matches::is_infrastructure(unit, t) || t.capturable_on_entering)
        })
        .collect();
    if !captured.is_empty() {
        ctx.add_history(
            &format!("{} captures {}", ctx.state.player_name(new_owner), ctx.describe_units(&captured)),
            &captured,
        );
        let change = Change::unit_owner(ctx.state, &captured, new_owner)?;
        record_change(applied, ctx, change)?;
        let change = Change::mark_no_movement(ctx.state, &captured);
        record_change(applied, ctx, change)?;
    }
    Ok(())
}

/// Return every originally owned territory held by an ally, with its
/// infrastructure, to `orig`
fn restore_original_holdings(
    applied: &mut CompositeChange,
    orig: PlayerId,
    ctx: &mut BattleContext<'_>,
) -> Result<()> {
    let held_by_allies: Vec<TerritoryId> = ctx
        .state
        .territories
        .iter()
        .filter(|t| t.original_owner == Some(orig))
        .filter(|t| match t.owner {
            Some(owner) => owner != orig && ctx.state.is_allied(orig, owner),
            None => false,
        })
        .map(|t| t.id)
        .collect();
    for t in held_by_allies {
        let change = Change::territory_owner(ctx.state, t, Some(orig))?;
        record_change(applied, ctx, change)?;
        let infrastructure = ctx.state.filter(&ctx.state.units_in(t), matches::is_infrastructure);
        if !infrastructure.is_empty() {
            let change = Change::unit_owner(ctx.state, &infrastructure, orig)?;
            record_change(applied, ctx, change)?;
        }
        ctx.add_history(
            &format!(
                "{} is returned to {}",
                ctx.state.territory_name(t),
                ctx.state.player_name(orig)
            ),
            &[],
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{AutoCasualtySelector, AutoRemote, InMemoryHistory, RecordingDisplay, ScriptedDice};
    use crate::core::config::RulesConfig;
    use crate::model::GameStateBuilder;

    struct Harness {
        dice: ScriptedDice,
        casualties: AutoCasualtySelector,
        remote: AutoRemote,
        display: RecordingDisplay,
        history: InMemoryHistory,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                dice: ScriptedDice::always(0),
                casualties: AutoCasualtySelector,
                remote: AutoRemote,
                display: RecordingDisplay::new(),
                history: InMemoryHistory::new(),
            }
        }

        fn ctx<'a>(&'a mut self, state: &'a mut GameState, rules: &'a RulesConfig) -> BattleContext<'a> {
            BattleContext::new(
                state,
                rules,
                &mut self.dice,
                &mut self.casualties,
                &mut self.remote,
                &mut self.display,
                &mut self.history,
            )
        }
    }

    fn europe() -> GameState {
        GameStateBuilder::classic()
            .player("Germany", 30)
            .player("Russia", 24)
            .player("UK", 20)
            .allied("Russia", "UK")
            .land("Russia", Some("Russia"), 8)
            .land("Karelia", Some("Russia"), 2)
            .land("Poland", Some("Germany"), 2)
            .land("Switzerland", None, 0)
            .capital("Russia", "Russia")
            .units("Russia", "Germany", 3, "armour")
            .units("Russia", "Russia", 1, "factory")
            .units("Russia", "Russia", 1, "aa_gun")
            .build()
            .unwrap()
    }

    #[test]
    fn test_capital_capture_takes_treasury() {
        let mut state = europe();
        let rules = RulesConfig::default();
        let mut h = Harness::new();
        let mut registry = BattleRegistry::new();
        let russia = state.territory_id("Russia").unwrap();
        let armour = state.units_of_type(russia, PlayerId(0), "armour");
        let mut ctx = h.ctx(&mut state, &rules);
        registry.take_over(russia, PlayerId(0), &armour, &mut ctx).unwrap();

        assert_eq!(state.player(PlayerId(0)).unwrap().pus, 54);
        assert_eq!(state.player(PlayerId(1)).unwrap().pus, 0);
        assert_eq!(state.territory(russia).unwrap().owner, Some(PlayerId(0)));
        // infrastructure changes hands
        let factory = state.units_of_type(russia, PlayerId(0), "factory");
        assert_eq!(factory.len(), 1);
        assert!(state.unit(armour[0]).unwrap().was_in_combat);
        assert_eq!(h.display.captures(), vec![(russia, PlayerId(0), CaptureKind::Capital)]);
    }

    #[test]
    fn test_take_over_twice_is_idempotent() {
        let mut state = europe();
        let rules = RulesConfig::default();
        let mut h = Harness::new();
        let mut registry = BattleRegistry::new();
        let karelia = state.territory_id("Karelia").unwrap();
        let mut ctx = h.ctx(&mut state, &rules);
        registry.take_over(karelia, PlayerId(0), &[], &mut ctx).unwrap();
        let after_first = ctx.state.clone();
        let second = registry.take_over(karelia, PlayerId(0), &[], &mut ctx).unwrap();
        assert!(second.is_empty());
        assert_eq!(state, after_first);
        assert_eq!(h.display.captures().len(), 1);
    }

    #[test]
    fn test_neutral_charge_capped_by_treasury() {
        let mut state = europe();
        state.player_mut(PlayerId(0)).unwrap().pus = 2;
        let rules = RulesConfig {
            neutral_charge: Some(3),
            ..RulesConfig::default()
        };
        let mut h = Harness::new();
        let mut registry = BattleRegistry::new();
        let swiss = state.territory_id("Switzerland").unwrap();
        let mut ctx = h.ctx(&mut state, &rules);
        registry.take_over(swiss, PlayerId(0), &[], &mut ctx).unwrap();
        assert_eq!(state.player(PlayerId(0)).unwrap().pus, 0);
        assert_eq!(state.territory(swiss).unwrap().owner, Some(PlayerId(0)));
    }

    #[test]
    fn test_liberated_territory_returns_to_ally() {
        let mut state = europe();
        let karelia = state.territory_id("Karelia").unwrap();
        state.territory_mut(karelia).unwrap().owner = Some(PlayerId(0));
        let rules = RulesConfig::default();
        let mut h = Harness::new();
        let mut registry = BattleRegistry::new();
        let mut ctx = h.ctx(&mut state, &rules);
        registry.take_over(karelia, PlayerId(2), &[], &mut ctx).unwrap();
        // Russia still holds its capital, so the UK hands Karelia back
        assert_eq!(state.territory(karelia).unwrap().owner, Some(PlayerId(1)));
    }

    #[test]
    fn test_pending_raid_at_site_is_an_invariant_violation() {
        use crate::battle::registry::AttackKind;
        use crate::model::Route;

        let mut state = GameStateBuilder::classic()
            .player("Germany", 0)
            .player("UK", 10)
            .land("France", Some("Germany"), 3)
            .land("London", Some("UK"), 8)
            .connect("France", "London")
            .units("France", "Germany", 1, "bomber")
            .units("London", "UK", 1, "factory")
            .build()
            .unwrap();
        let rules = RulesConfig::default();
        let mut h = Harness::new();
        let mut registry = BattleRegistry::new();
        let france = state.territory_id("France").unwrap();
        let london = state.territory_id("London").unwrap();
        let bomber = state.units_of_type(france, PlayerId(0), "bomber");
        let mut ctx = h.ctx(&mut state, &rules);
        registry
            .add_attack(&Route::new(france, vec![london]), &bomber, PlayerId(0), AttackKind::Bombing, &mut ctx)
            .unwrap();
        assert_eq!(registry.len(), 1);
        let err = registry.take_over(london, PlayerId(0), &[], &mut ctx).unwrap_err();
        assert!(err.is_fatal());
        assert!(registry.is_empty());
    }
}
