//! Production [`MailProvider`] over the Gmail REST API

use async_trait::async_trait;
use google_gmail1::api::{
    BatchDeleteMessagesRequest, BatchModifyMessagesRequest, Filter, FilterAction, FilterCriteria,
};
use tracing::debug;

use crate::auth::GmailHub;
use crate::error::{EngineError, Result};
use crate::provider::{MailProvider, MutateOutcome, Mutation, SearchPage};
use crate::query;

const SCOPE_MODIFY: &str = "https://www.googleapis.com/auth/gmail.modify";
const SCOPE_SETTINGS: &str = "https://www.googleapis.com/auth/gmail.settings.basic";

/// Gmail's documented ceiling for a single batchModify/batchDelete call
pub const MAX_BATCH_MUTATE: usize = 1000;

/// Gmail adapter; authentication rides on the hub's shared authenticator
pub struct GmailProvider {
    hub: GmailHub,
}

impl GmailProvider {
    pub fn new(hub: GmailHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl MailProvider for GmailProvider {
    async fn search_ids(
        &self,
        query: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<SearchPage> {
        let mut call = self
            .hub
            .users()
            .messages_list("me")
            .q(query)
            .max_results(page_size);

        if let Some(token) = page_token {
            call = call.page_token(token);
        }

        let (_, response) = call.add_scope(SCOPE_MODIFY).doit().await?;

        let ids: Vec<String> = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        debug!(count = ids.len(), "fetched message id page");

        Ok(SearchPage {
            ids,
            next_page_token: response.next_page_token,
        })
    }

    async fn batch_mutate(&self, ids: &[String], mutation: &Mutation) -> Result<MutateOutcome> {
        if ids.len() > MAX_BATCH_MUTATE {
            return Err(EngineError::Validation(format!(
                "batch of {} exceeds the provider limit of {}",
                ids.len(),
                MAX_BATCH_MUTATE
            )));
        }

        match mutation {
            Mutation::Delete => {
                let request = BatchDeleteMessagesRequest {
                    ids: Some(ids.to_vec()),
                };
                self.hub
                    .users()
                    .messages_batch_delete(request, "me")
                    .add_scope(SCOPE_MODIFY)
                    .doit()
                    .await?;
            }
            Mutation::Labels { add, remove } => {
                let request = BatchModifyMessagesRequest {
                    ids: Some(ids.to_vec()),
                    add_label_ids: if add.is_empty() {
                        None
                    } else {
                        Some(add.clone())
                    },
                    remove_label_ids: if remove.is_empty() {
                        None
                    } else {
                        Some(remove.clone())
                    },
                };
                self.hub
                    .users()
                    .messages_batch_modify(request, "me")
                    .add_scope(SCOPE_MODIFY)
                    .doit()
                    .await?;
            }
        }

        debug!(count = ids.len(), "batch mutate applied");
        // Gmail's batch endpoints reject the whole call rather than reporting
        // per-sub-batch failures, so a success here means every ID applied.
        Ok(MutateOutcome::all_applied())
    }

    async fn create_filter(
        &self,
        senders: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<String> {
        let criteria = FilterCriteria {
            from: Some(senders.join(" OR ")),
            query: Some(query::sender_clause(senders)),
            exclude_chats: Some(true),
            ..Default::default()
        };

        let action = FilterAction {
            add_label_ids: if add_label_ids.is_empty() {
                None
            } else {
                Some(add_label_ids.to_vec())
            },
            remove_label_ids: if remove_label_ids.is_empty() {
                None
            } else {
                Some(remove_label_ids.to_vec())
            },
            ..Default::default()
        };

        let filter = Filter {
            criteria: Some(criteria),
            action: Some(action),
            ..Default::default()
        };

        let (_, created) = self
            .hub
            .users()
            .settings_filters_create(filter, "me")
            .add_scope(SCOPE_SETTINGS)
            .doit()
            .await?;

        created
            .id
            .ok_or_else(|| EngineError::Filter("Created filter has no ID".to_string()))
    }
}
