//! Organizer Lookup
//!
//! Resolves organizer identifiers to their subscription plan. Organizer
//! accounts are owned elsewhere; this crate only needs read access through
//! [`OrganizerDirectory`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::throttle::SubscriptionPlan;

/// Organizer account reference data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organizer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub plan: SubscriptionPlan,
}

impl Organizer {
    pub fn new(id: impl Into<String>, name: impl Into<String>, plan: SubscriptionPlan) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            plan,
        }
    }
}

/// Organizer lookup errors
#[derive(Debug, thiserror::Error)]
pub enum OrganizerError {
    /// Directory backend could not be reached
    #[error("Organizer directory unavailable: {0}")]
    Unavailable(String),
}

/// Read access to organizer accounts
#[async_trait]
pub trait OrganizerDirectory: Send + Sync + fmt::Debug {
    /// Look up an organizer by id
    async fn find(&self, id: &str) -> Result<Option<Organizer>, OrganizerError>;
}

/// Directory held in memory, seeded from configuration
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrganizerDirectory {
    organizers: HashMap<String, Organizer>,
}

impl InMemoryOrganizerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an organizer
    pub fn insert(&mut self, organizer: Organizer) {
        self.organizers.insert(organizer.id.clone(), organizer);
    }

    pub fn len(&self) -> usize {
        self.organizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.organizers.is_empty()
    }
}

impl FromIterator<Organizer> for InMemoryOrganizerDirectory {
    fn from_iter<I: IntoIterator<Item = Organizer>>(iter: I) -> Self {
        let mut directory = Self::new();
        for organizer in iter {
            directory.insert(organizer);
        }
        directory
    }
}

#[async_trait]
impl OrganizerDirectory for InMemoryOrganizerDirectory {
    async fn find(&self, id: &str) -> Result<Option<Organizer>, OrganizerError> {
        Ok(self.organizers.get(id).cloned())
    }
}

/// Organizer lookups used by the throttle guard
#[derive(Debug, Clone)]
pub struct OrganizerService {
    directory: Arc<dyn OrganizerDirectory>,
}

impl OrganizerService {
    pub fn new(directory: Arc<dyn OrganizerDirectory>) -> Self {
        Self { directory }
    }

    /// Find an organizer, `None` when unknown or when the directory fails
    pub async fn find_organizer_by_id(&self, id: &str) -> Option<Organizer> {
        match self.directory.find(id).await {
            Ok(organizer) => organizer,
            Err(e) => {
                warn!("Organizer lookup for {} failed: {}", id, e);
                None
            }
        }
    }

    /// Plan for an organizer, FREE when the organizer cannot be found
    pub async fn get_organizer_subscription_plan(&self, id: &str) -> SubscriptionPlan {
        self.find_organizer_by_id(id)
            .await
            .map(|organizer| organizer.plan)
            .unwrap_or_default()
    }
}

impl Default for OrganizerService {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryOrganizerDirectory::new()))
    }
}
