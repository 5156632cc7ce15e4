//! Mail-provider collaborator contract
//!
//! The engine only ever talks to the provider through this trait, so tests
//! substitute stubs and the production Gmail adapter lives in [`crate::gmail`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One page of a message-ID search
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// The mutation a batch applies to a list of message IDs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Mutation {
    /// Move the messages to trash
    Delete,
    /// Add and/or remove labels in a single call
    Labels {
        add: Vec<String>,
        remove: Vec<String>,
    },
}

/// Result of a batch mutate; the provider never fails the whole call
/// atomically, it reports the sub-batches that did not apply
#[derive(Debug, Clone, Default)]
pub struct MutateOutcome {
    pub failed_ids: Vec<String>,
}

impl Mutation {
    /// Whether applying the mutation removes the messages from later
    /// searches of the same query. Deletion does; label changes leave the
    /// matched set intact.
    pub fn shrinks_result_set(&self) -> bool {
        matches!(self, Mutation::Delete)
    }
}

impl MutateOutcome {
    pub fn all_applied() -> Self {
        Self::default()
    }
}

/// Operations the engine needs from the remote mail service
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Search for message IDs matching a query, one page at a time
    async fn search_ids(
        &self,
        query: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<SearchPage>;

    /// Apply a mutation to a list of message IDs (caller keeps the list
    /// within the provider's batch limit)
    async fn batch_mutate(&self, ids: &[String], mutation: &Mutation) -> Result<MutateOutcome>;

    /// Create a provider-side filter; returns the new filter's ID
    async fn create_filter(
        &self,
        senders: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<String>;
}
