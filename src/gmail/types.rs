//! Gmail API type definitions
//!
//! Wire types mirror the Gmail API responses. The flat result types at the
//! bottom are what the adapter hands back to tool callers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// A Gmail message part (MIME part)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_id: Option<String>,

    /// MIME type of this part
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Filename for attachments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<MessagePartBody>,

    /// Nested parts (for multipart messages)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MessagePart>,
}

/// Header in a message part
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Body of a message part
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessagePartBody {
    /// Attachment ID (if this is an attachment)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,

    /// Size in bytes
    #[serde(default)]
    pub size: i64,

    /// Base64url-encoded data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A Gmail message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_ids: Vec<String>,

    /// Snippet (preview text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,

    /// Message payload (MIME structure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<MessagePart>,

    /// Internal date (epoch millis)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_date: Option<String>,
}

/// List of messages response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageList {
    #[serde(default)]
    pub messages: Vec<MessageRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_size_estimate: Option<u32>,
}

/// Reference to a message (id and thread_id only)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,

    #[serde(default)]
    pub thread_id: Option<String>,
}

/// A Gmail label
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: String,

    pub name: String,

    /// Label type (system or user)
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub label_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_list_visibility: Option<MessageListVisibility>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_list_visibility: Option<LabelListVisibility>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages_total: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages_unread: Option<i32>,
}

impl Label {
    pub fn is_system(&self) -> bool {
        self.label_type.as_deref() == Some("system")
    }
}

/// List of labels response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelList {
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// Request to create a label
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLabelRequest {
    pub name: String,
    pub message_list_visibility: MessageListVisibility,
    pub label_list_visibility: LabelListVisibility,
}

/// Partial label update (PATCH semantics)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLabelRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_list_visibility: Option<MessageListVisibility>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_list_visibility: Option<LabelListVisibility>,
}

impl UpdateLabelRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.message_list_visibility.is_none()
            && self.label_list_visibility.is_none()
    }
}

/// Request to modify message labels
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModifyMessageRequest {
    pub add_label_ids: Vec<String>,
    pub remove_label_ids: Vec<String>,
}

/// Gmail draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,

    pub message: Message,
}

/// List of drafts response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftList {
    #[serde(default)]
    pub drafts: Vec<DraftRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRef {
    pub id: String,
}

/// Request to send or create a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Raw RFC822 message (base64url encoded)
    pub raw: String,

    /// Thread ID (for replies)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// Body for draft create and update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub message: SendMessageRequest,
}

/// Body for draft send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendDraftRequest {
    pub id: String,
}

/// Attachment data response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentData {
    #[serde(default)]
    pub size: i64,

    /// Base64url-encoded data
    pub data: String,
}

/// Google API error envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub reason: String,
}

impl ApiErrorBody {
    pub fn has_reason(&self, reason: &str) -> bool {
        self.errors.iter().any(|e| e.reason == reason)
    }
}

/// Extracted email content
#[derive(Debug, Clone, Default)]
pub struct EmailContent {
    /// Plain text content
    pub text: String,

    /// HTML content
    pub html: String,
}

/// Email attachment info
#[derive(Debug, Clone, Serialize)]
pub struct EmailAttachment {
    pub id: String,
    pub filename: String,
    pub mime_type: String,

    /// Size in bytes
    pub size: i64,
}

/// Visibility options for labels in message list
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageListVisibility {
    #[default]
    Show,
    Hide,
}

/// Visibility options for labels in label list
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum LabelListVisibility {
    #[default]
    #[serde(rename = "labelShow")]
    Show,
    #[serde(rename = "labelShowIfUnread")]
    ShowIfUnread,
    #[serde(rename = "labelHide")]
    Hide,
}

// ==================== Flat results ====================

/// One message in a listing
#[derive(Debug, Clone, Serialize)]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
    pub snippet: String,
    pub labels: Vec<String>,
    pub read: bool,
}

/// A fully fetched message
#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    #[serde(flatten)]
    pub summary: MessageSummary,
    pub cc: String,
    pub body: String,
    pub is_html: bool,
    pub attachments: Vec<EmailAttachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome for one identifier of a batch call
#[derive(Debug, Clone, Serialize)]
pub struct BatchItemOutcome {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

/// Ordered per-identifier results of a batch delete
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchDeleteReport {
    pub results: Vec<BatchItemOutcome>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl BatchDeleteReport {
    pub fn push_success(&mut self, id: String) {
        self.success_count += 1;
        self.results.push(BatchItemOutcome {
            id,
            success: true,
            error: None,
        });
    }

    pub fn push_failure(&mut self, id: String, kind: ErrorKind, message: String) {
        self.failure_count += 1;
        self.results.push(BatchItemOutcome {
            id,
            success: false,
            error: Some(ItemError { kind, message }),
        });
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.id.as_str())
            .collect()
    }
}

/// Result of a label modification
#[derive(Debug, Clone, Serialize)]
pub struct LabelChange {
    pub id: String,
    pub labels: Vec<String>,
}

/// A draft with its message content
#[derive(Debug, Clone, Serialize)]
pub struct DraftDetails {
    pub id: String,
    pub message: EmailMessage,
}
