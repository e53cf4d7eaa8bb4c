//! Label management for Gmail

use tracing::info;

use crate::config::gmail::labels::SYSTEM;
use crate::error::{GmailMcpError, Result, ValidationError};
use crate::gmail::client::GmailClient;
use crate::gmail::types::{
    CreateLabelRequest, Label, LabelList, LabelListVisibility, MessageListVisibility,
    UpdateLabelRequest,
};

/// Label manager for Gmail operations
pub struct LabelManager<'a> {
    client: &'a GmailClient,
}

impl<'a> LabelManager<'a> {
    pub fn new(client: &'a GmailClient) -> Self {
        Self { client }
    }

    fn url(&self, label_id: &str) -> Result<String> {
        self.client.item_url("labels", "label_id", label_id)
    }

    /// Create a new Gmail label. A name clash surfaces as a conflict.
    pub async fn create(
        &self,
        name: &str,
        message_list_visibility: MessageListVisibility,
        label_list_visibility: LabelListVisibility,
    ) -> Result<Label> {
        if name.trim().is_empty() {
            return Err(GmailMcpError::missing_field("name"));
        }

        let request = CreateLabelRequest {
            name: name.to_string(),
            message_list_visibility,
            label_list_visibility,
        };

        let label: Label = self
            .client
            .send_json(&format!("label {}", name), |http| {
                http.post(self.client.url("labels")).json(&request)
            })
            .await?;

        info!(label_id = %label.id, name = %label.name, "Created label");
        Ok(label)
    }

    /// Patch an existing label; unset fields are left alone
    pub async fn update(&self, label_id: &str, updates: UpdateLabelRequest) -> Result<Label> {
        if updates.is_empty() {
            return Err(GmailMcpError::invalid_parameter(
                "label_id",
                "nothing to update",
            ));
        }

        let url = self.url(label_id)?;
        self.client
            .send_json(&format!("label {}", label_id), |http| {
                http.patch(&url).json(&updates)
            })
            .await
    }

    /// Delete a user label. System labels are refused.
    pub async fn delete(&self, label_id: &str) -> Result<()> {
        if SYSTEM.contains(&label_id) {
            return Err(system_label(label_id));
        }

        let label = self.get(label_id).await?;
        if label.is_system() {
            return Err(system_label(label_id));
        }

        let url = self.url(label_id)?;
        self.client
            .send(&format!("label {}", label_id), |http| http.delete(&url))
            .await?;

        info!(label_id, "Deleted label");
        Ok(())
    }

    /// Get a specific label by ID
    pub async fn get(&self, label_id: &str) -> Result<Label> {
        let url = self.url(label_id)?;
        self.client
            .send_json(&format!("label {}", label_id), |http| http.get(&url))
            .await
    }

    /// List all labels, system labels first
    pub async fn list(&self) -> Result<LabelListResult> {
        let list: LabelList = self
            .client
            .send_json("label list", |http| http.get(self.client.url("labels")))
            .await?;

        let (system, user): (Vec<Label>, Vec<Label>) =
            list.labels.into_iter().partition(Label::is_system);

        Ok(LabelListResult { system, user })
    }

    /// Find a label by name (case-insensitive)
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Label>> {
        let name_lower = name.to_lowercase();
        Ok(self
            .list()
            .await?
            .into_all()
            .into_iter()
            .find(|l| l.name.to_lowercase() == name_lower))
    }

    /// Return the label named `name`, creating it with default visibility
    /// when absent
    pub async fn get_or_create(&self, name: &str) -> Result<Label> {
        if let Some(label) = self.find_by_name(name).await? {
            return Ok(label);
        }

        self.create(name, MessageListVisibility::default(), LabelListVisibility::default())
            .await
    }
}

fn system_label(label_id: &str) -> GmailMcpError {
    GmailMcpError::Validation(ValidationError::SystemLabel {
        label_id: label_id.to_string(),
    })
}

/// Result of listing labels
#[derive(Debug, Clone, Default)]
pub struct LabelListResult {
    pub system: Vec<Label>,
    pub user: Vec<Label>,
}

impl LabelListResult {
    pub fn total(&self) -> usize {
        self.system.len() + self.user.len()
    }

    pub fn into_all(self) -> Vec<Label> {
        let mut all = self.system;
        all.extend(self.user);
        all
    }
}
