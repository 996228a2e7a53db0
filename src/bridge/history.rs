//! Human-readable transcript of what happened

use serde::{Deserialize, Serialize};

use crate::core::types::UnitId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryChild {
    pub text: String,
    pub units: Vec<UnitId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub text: String,
    pub children: Vec<HistoryChild>,
}

/// Audit sink. Battle logic never branches on what it does.
pub trait HistoryWriter {
    fn start_event(&mut self, text: &str);
    fn add_child(&mut self, text: &str, units: &[UnitId]);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryHistory {
    pub events: Vec<HistoryEvent>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any event or child text containing `fragment`
    pub fn mentions(&self, fragment: &str) -> bool {
        self.events.iter().any(|e| {
            e.text.contains(fragment) || e.children.iter().any(|c| c.text.contains(fragment))
        })
    }

    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for e in &self.events {
            out.push(e.text.clone());
            for c in &e.children {
                out.push(format!("  {}", c.text));
            }
        }
        out
    }
}

impl HistoryWriter for InMemoryHistory {
    fn start_event(&mut self, text: &str) {
        self.events.push(HistoryEvent {
            text: text.to_string(),
            children: Vec::new(),
        });
    }

    fn add_child(&mut self, text: &str, units: &[UnitId]) {
        let child = HistoryChild {
            text: text.to_string(),
            units: units.to_vec(),
        };
        match self.events.last_mut() {
            Some(event) => event.children.push(child),
            None => self.events.push(HistoryEvent {
                text: text.to_string(),
                children: Vec::new(),
            }),
        }
    }
}
