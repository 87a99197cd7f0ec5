//! Agent identity registry.
//!
//! Passed explicitly to [`crate::client::Agent::connect`]; tests create their
//! own registry so agents never collide across test cases.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::client::error::AgentError;

/// Tracks which agent identities are live.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    // identity -> connection description, for diagnostics
    live: Arc<DashMap<String, String>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `identity`. Fails if an agent already holds it.
    pub fn register(&self, identity: &str, target: &str) -> Result<Registration, AgentError> {
        if identity.trim().is_empty() {
            return Err(AgentError::EmptyIdentity);
        }

        match self.live.entry(identity.to_string()) {
            Entry::Occupied(_) => Err(AgentError::DuplicateIdentity(identity.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(target.to_string());
                Ok(Registration {
                    registry: self.clone(),
                    identity: identity.to_string(),
                })
            }
        }
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.live.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Live identities and what they are connected to.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut entries: Vec<_> = self
            .live
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort();
        entries
    }
}

/// Holds an identity until dropped.
#[derive(Debug)]
pub struct Registration {
    registry: AgentRegistry,
    identity: String,
}

impl Registration {
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.live.remove(&self.identity);
        tracing::trace!(identity = %self.identity, "Agent identity released");
    }
}
