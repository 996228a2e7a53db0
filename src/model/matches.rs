//! Unit predicates
//!
//! Plain functions over a unit and its type so they can be passed straight
//! to [`GameState::filter`](crate::model::GameState::filter) and friends.

use crate::model::unit::{Unit, UnitDomain, UnitType};

pub fn is_air(_: &Unit, t: &UnitType) -> bool {
    t.domain == UnitDomain::Air
}

pub fn is_not_air(u: &Unit, t: &UnitType) -> bool {
    !is_air(u, t)
}

pub fn is_land(_: &Unit, t: &UnitType) -> bool {
    t.domain == UnitDomain::Land
}

pub fn is_sea(_: &Unit, t: &UnitType) -> bool {
    t.domain == UnitDomain::Sea
}

pub fn is_sub(_: &Unit, t: &UnitType) -> bool {
    t.is_sub
}

pub fn is_not_sub(_: &Unit, t: &UnitType) -> bool {
    !t.is_sub
}

pub fn is_destroyer(_: &Unit, t: &UnitType) -> bool {
    t.is_destroyer
}

pub fn is_infrastructure(_: &Unit, t: &UnitType) -> bool {
    t.is_infrastructure
}

pub fn is_not_infrastructure(_: &Unit, t: &UnitType) -> bool {
    !t.is_infrastructure
}

pub fn is_suicide(_: &Unit, t: &UnitType) -> bool {
    t.is_suicide
}

pub fn is_strategic_bomber(_: &Unit, t: &UnitType) -> bool {
    t.is_strategic_bomber
}

pub fn is_transport(_: &Unit, t: &UnitType) -> bool {
    t.is_transport
}

/// A transport with no combat value of its own
pub fn is_defenseless_transport(_: &Unit, t: &UnitType) -> bool {
    t.is_transport && t.attack == 0 && t.defense == 0
}

pub fn is_air_transport(_: &Unit, t: &UnitType) -> bool {
    t.is_air_transport
}

pub fn is_carrier(_: &Unit, t: &UnitType) -> bool {
    t.carrier_capacity > 0
}

/// Can still absorb bombing damage
pub fn can_be_damaged(u: &Unit, t: &UnitType) -> bool {
    t.max_damage > 0 && u.bombing_damage < t.max_damage
}

pub fn is_aa(_: &Unit, t: &UnitType) -> bool {
    t.aa.is_some()
}

pub fn is_aa_for_combat(_: &Unit, t: &UnitType) -> bool {
    t.aa.as_ref().map(|aa| aa.in_combat).unwrap_or(false)
}

pub fn is_aa_for_raids(_: &Unit, t: &UnitType) -> bool {
    t.aa.as_ref().map(|aa| aa.vs_raids).unwrap_or(false)
}

pub fn is_submerged(u: &Unit, _: &UnitType) -> bool {
    u.submerged
}

pub fn can_bombard(_: &Unit, t: &UnitType) -> bool {
    t.bombard > 0
}

pub fn can_blitz(_: &Unit, t: &UnitType) -> bool {
    t.can_blitz
}

pub fn can_air_battle(u: &Unit, t: &UnitType) -> bool {
    is_air(u, t) && (t.air_attack > 0 || t.can_escort)
}

pub fn can_intercept(u: &Unit, t: &UnitType) -> bool {
    is_air(u, t) && t.can_intercept && !u.was_in_air_battle
}

/// Has some attack or defense value on the given side
pub fn has_strength(defending: bool) -> impl Fn(&Unit, &UnitType) -> bool {
    move |_, t| t.strength(defending) > 0
}
