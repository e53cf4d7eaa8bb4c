//! Draft management for Gmail

use tracing::{debug, info};

use crate::error::{ErrorKind, GmailMcpError, Result};
use crate::gmail::client::GmailClient;
use crate::gmail::types::{
    Draft, DraftDetails, DraftList, DraftRequest, Message, SendDraftRequest, SendMessageRequest,
};
use crate::gmail::utils::{create_email_message, encode_raw_message, flatten_message, EmailParams};

/// Draft manager for Gmail operations
pub struct DraftManager<'a> {
    client: &'a GmailClient,
}

impl<'a> DraftManager<'a> {
    pub fn new(client: &'a GmailClient) -> Self {
        Self { client }
    }

    fn url(&self, draft_id: &str) -> Result<String> {
        self.client.item_url("drafts", "draft_id", draft_id)
    }

    /// List drafts with their full content
    pub async fn list(&self, max_results: u32) -> Result<Vec<DraftDetails>> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let list: DraftList = self
            .client
            .send_json("draft list", |http| {
                http.get(self.client.url("drafts"))
                    .query(&[("maxResults", max_results)])
            })
            .await?;

        let mut drafts = Vec::with_capacity(list.drafts.len());
        for draft_ref in list.drafts.iter().take(max_results as usize) {
            match self.get(&draft_ref.id).await {
                Ok(draft) => drafts.push(draft),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(draft_id = %draft_ref.id, "Draft disappeared while listing");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(drafts)
    }

    pub async fn get(&self, draft_id: &str) -> Result<DraftDetails> {
        let url = self.url(draft_id)?;
        let draft: Draft = self
            .client
            .send_json(&format!("draft {}", draft_id), |http| {
                http.get(&url).query(&[("format", "full")])
            })
            .await?;

        Ok(DraftDetails {
            id: draft.id,
            message: flatten_message(&draft.message),
        })
    }

    /// Create a draft, returning its id
    pub async fn create(&self, params: &EmailParams) -> Result<String> {
        let request = draft_request(None, params)?;
        let draft: Draft = self
            .client
            .send_json_once("draft", |http| {
                http.post(self.client.url("drafts")).json(&request)
            })
            .await?;

        info!(draft_id = %draft.id, "Created draft");
        Ok(draft.id)
    }

    /// Replace a draft's content
    pub async fn update(&self, draft_id: &str, params: &EmailParams) -> Result<String> {
        let url = self.url(draft_id)?;
        let request = draft_request(Some(draft_id), params)?;
        let draft: Draft = self
            .client
            .send_json(&format!("draft {}", draft_id), |http| {
                http.put(&url).json(&request)
            })
            .await?;

        info!(draft_id = %draft.id, "Updated draft");
        Ok(draft.id)
    }

    pub async fn delete(&self, draft_id: &str) -> Result<()> {
        let url = self.url(draft_id)?;
        self.client
            .send(&format!("draft {}", draft_id), |http| http.delete(&url))
            .await?;

        info!(draft_id, "Deleted draft");
        Ok(())
    }

    /// Send a draft, returning the id of the sent message
    pub async fn send(&self, draft_id: &str) -> Result<String> {
        let request = SendDraftRequest {
            id: draft_id.to_string(),
        };
        let sent: Message = self
            .client
            .send_json_once(&format!("draft {}", draft_id), |http| {
                http.post(self.client.url("drafts/send")).json(&request)
            })
            .await?;

        info!(draft_id, message_id = %sent.id, "Sent draft");
        Ok(sent.id)
    }
}

fn draft_request(draft_id: Option<&str>, params: &EmailParams) -> Result<DraftRequest> {
    if params.subject.trim().is_empty() {
        return Err(GmailMcpError::missing_field("subject"));
    }
    let raw_message = create_email_message(params)?;

    Ok(DraftRequest {
        id: draft_id.map(str::to_string),
        message: SendMessageRequest {
            raw: encode_raw_message(&raw_message),
            thread_id: params.thread_id.clone(),
        },
    })
}
