use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::PlayerId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Production units in the treasury
    pub pus: u32,
    /// Capitals the player must still own to keep collecting income
    pub retain_capital_number: u32,
    /// Captured treasuries are destroyed instead of transferred
    pub destroys_pus: bool,
}

impl Player {
    pub fn new(id: PlayerId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            pus: 0,
            retain_capital_number: 1,
            destroys_pus: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relationship {
    War,
    Allied,
    Neutral,
}

/// Symmetric relationship table. Unlisted pairs of distinct players are at war.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationships {
    #[serde(with = "pair_map")]
    pairs: BTreeMap<(PlayerId, PlayerId), Relationship>,
}

impl Relationships {
    fn key(a: PlayerId, b: PlayerId) -> (PlayerId, PlayerId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn get(&self, a: PlayerId, b: PlayerId) -> Relationship {
        if a == b {
            return Relationship::Allied;
        }
        self.pairs
            .get(&Self::key(a, b))
            .copied()
            .unwrap_or(Relationship::War)
    }

    pub fn set(&mut self, a: PlayerId, b: PlayerId, rel: Relationship) {
        if a != b {
            self.pairs.insert(Self::key(a, b), rel);
        }
    }

    pub fn is_at_war(&self, a: PlayerId, b: PlayerId) -> bool {
        self.get(a, b) == Relationship::War
    }

    pub fn is_allied(&self, a: PlayerId, b: PlayerId) -> bool {
        self.get(a, b) == Relationship::Allied
    }
}

/// JSON object keys must be strings, so tuple keys travel as a list
mod pair_map {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::Relationship;
    use crate::core::types::PlayerId;

    type Pairs = BTreeMap<(PlayerId, PlayerId), Relationship>;

    pub fn serialize<S: Serializer>(map: &Pairs, s: S) -> Result<S::Ok, S::Error> {
        let list: Vec<(PlayerId, PlayerId, Relationship)> =
            map.iter().map(|(&(a, b), &r)| (a, b, r)).collect();
        list.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Pairs, D::Error> {
        let list = Vec::<(PlayerId, PlayerId, Relationship)>::deserialize(d)?;
        Ok(list.into_iter().map(|(a, b, r)| ((a, b), r)).collect())
    }
}
