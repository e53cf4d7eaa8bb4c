//! MCP Tool definitions and handlers
//!
//! Each tool takes a typed argument struct. Its published input schema is
//! generated from the struct, and arguments are validated before the Gmail
//! client is called. Errors never leave this module; they become failure
//! results carrying the error kind.

use std::path::Path;
use std::sync::Arc;

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use validator::Validate;

use crate::config::gmail::labels::INBOX;
use crate::error::{GmailMcpError, McpError, Result};
use crate::gmail::client::GmailClient;
use crate::gmail::labels::LabelListResult;
use crate::gmail::types::{
    EmailMessage, Label, LabelListVisibility, MessageListVisibility, MessageSummary,
    UpdateLabelRequest,
};
use crate::gmail::utils::{
    format_size, load_attachment, parse_recipients, sanitize_filename, EmailParams,
};
use crate::mcp::types::{CallToolResult, Tool};

// ==================== Arguments ====================

fn default_list_max() -> u32 {
    10
}

fn default_search_max() -> u32 {
    5
}

fn default_label() -> String {
    INBOX.to_string()
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct ListEmailsArgs {
    /// Maximum number of emails to return (0-500)
    #[serde(default = "default_list_max")]
    #[validate(range(max = 500))]
    pub max_results: u32,

    /// Label to list, e.g. INBOX, SENT or a user label id
    #[serde(default = "default_label")]
    pub label: String,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct EmailIdArgs {
    /// ID of the email message
    #[validate(length(min = 1))]
    pub email_id: String,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct SearchEmailsArgs {
    /// Gmail search query, e.g. "from:alice is:unread"
    pub query: String,

    /// Maximum number of emails to return (0-500)
    #[serde(default = "default_search_max")]
    #[validate(range(max = 500))]
    pub max_results: u32,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct SendEmailArgs {
    /// Recipient addresses, comma separated
    pub to: String,

    pub subject: String,

    /// Plain text body
    pub body: String,

    /// CC recipients, comma separated
    #[serde(default)]
    pub cc: Option<String>,

    /// BCC recipients, comma separated
    #[serde(default)]
    pub bcc: Option<String>,

    /// Optional HTML alternative of the body
    #[serde(default)]
    pub html_body: Option<String>,

    /// Local file paths to attach
    #[serde(default)]
    pub attachments: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct ReplyArgs {
    /// ID of the email to reply to
    #[validate(length(min = 1))]
    pub email_id: String,

    /// Plain text reply body
    pub body: String,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct DeleteEmailsArgs {
    /// IDs of the emails to move to trash
    pub email_ids: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct ModifyLabelsArgs {
    /// ID of the email message
    #[validate(length(min = 1))]
    pub email_id: String,

    /// Label ids to add
    #[serde(default)]
    pub add_label_ids: Option<Vec<String>>,

    /// Label ids to remove
    #[serde(default)]
    pub remove_label_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct DownloadAttachmentArgs {
    /// ID of the email containing the attachment
    #[validate(length(min = 1))]
    pub email_id: String,

    #[validate(length(min = 1))]
    pub attachment_id: String,

    /// File name to save as
    #[serde(default)]
    pub filename: Option<String>,

    /// Directory to save into (defaults to the working directory)
    #[serde(default)]
    pub save_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema, Validate)]
pub struct NoArgs {}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct LabelIdArgs {
    #[validate(length(min = 1))]
    pub label_id: String,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct CreateLabelArgs {
    #[validate(length(min = 1))]
    pub name: String,

    /// Visibility in the label list
    #[serde(default)]
    pub label_list_visibility: LabelListVisibility,

    /// Visibility of messages with this label in the message list
    #[serde(default)]
    pub message_list_visibility: MessageListVisibility,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct UpdateLabelArgs {
    #[validate(length(min = 1))]
    pub label_id: String,

    /// New label name
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub label_list_visibility: Option<LabelListVisibility>,

    #[serde(default)]
    pub message_list_visibility: Option<MessageListVisibility>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct LabelNameArgs {
    #[validate(length(min = 1))]
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct ListDraftsArgs {
    /// Maximum number of drafts to return (0-500)
    #[serde(default = "default_list_max")]
    #[validate(range(max = 500))]
    pub max_results: u32,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct DraftIdArgs {
    #[validate(length(min = 1))]
    pub draft_id: String,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct DraftContentArgs {
    /// Recipient addresses, comma separated
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct UpdateDraftArgs {
    #[validate(length(min = 1))]
    pub draft_id: String,

    /// Recipient addresses, comma separated
    pub to: String,
    pub subject: String,
    pub body: String,
}

// ==================== Handler ====================

/// Tool handler
pub struct ToolHandler {
    gmail_client: Arc<GmailClient>,
}

impl ToolHandler {
    pub fn new(gmail_client: Arc<GmailClient>) -> Self {
        Self { gmail_client }
    }

    /// List all available tools
    pub fn list_tools(&self) -> Vec<Tool> {
        vec![
            tool_def::<ListEmailsArgs>("list_emails", "Lists recent emails carrying a label"),
            tool_def::<EmailIdArgs>("get_email", "Retrieves the full content of a specific email"),
            tool_def::<SearchEmailsArgs>("search_emails", "Searches for emails using Gmail search syntax"),
            tool_def::<SendEmailArgs>("send_email", "Sends a new email"),
            tool_def::<ReplyArgs>("reply_to_email", "Replies to an email in its thread"),
            tool_def::<EmailIdArgs>("delete_email", "Moves an email to trash"),
            tool_def::<DeleteEmailsArgs>("delete_emails", "Moves several emails to trash, reporting each one"),
            tool_def::<ModifyLabelsArgs>("modify_email_labels", "Adds or removes labels on an email"),
            tool_def::<DownloadAttachmentArgs>("download_attachment", "Downloads an email attachment to a local directory"),
            tool_def::<NoArgs>("list_labels", "Retrieves all Gmail labels"),
            tool_def::<LabelIdArgs>("get_label", "Gets details of a specific label"),
            tool_def::<CreateLabelArgs>("create_label", "Creates a new Gmail label"),
            tool_def::<UpdateLabelArgs>("update_label", "Updates an existing Gmail label"),
            tool_def::<LabelIdArgs>("delete_label", "Deletes a user label"),
            tool_def::<LabelNameArgs>("get_or_create_label", "Gets a label by name or creates it if it doesn't exist"),
            tool_def::<ListDraftsArgs>("list_drafts", "Lists draft emails"),
            tool_def::<DraftIdArgs>("get_draft", "Retrieves a draft with its content"),
            tool_def::<DraftContentArgs>("create_draft", "Creates a new draft"),
            tool_def::<UpdateDraftArgs>("update_draft", "Replaces the content of a draft"),
            tool_def::<DraftIdArgs>("delete_draft", "Deletes a draft"),
            tool_def::<DraftIdArgs>("send_draft", "Sends an existing draft"),
        ]
    }

    /// Call a tool by name. Failures come back as error results.
    pub async fn call_tool(&self, name: &str, args: Value) -> CallToolResult {
        info!(tool = name, "Tool call");
        match self.dispatch(name, args).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = name, kind = %e.kind(), error = %e, "Tool call failed");
                CallToolResult::from(e)
            }
        }
    }

    async fn dispatch(&self, name: &str, args: Value) -> Result<CallToolResult> {
        match name {
            "list_emails" => self.list_emails(parse_args(args)?).await,
            "get_email" => self.get_email(parse_args(args)?).await,
            "search_emails" => self.search_emails(parse_args(args)?).await,
            "send_email" => self.send_email(parse_args(args)?).await,
            "reply_to_email" => self.reply_to_email(parse_args(args)?).await,
            "delete_email" => self.delete_email(parse_args(args)?).await,
            "delete_emails" => self.delete_emails(parse_args(args)?).await,
            "modify_email_labels" => self.modify_email_labels(parse_args(args)?).await,
            "download_attachment" => self.download_attachment(parse_args(args)?).await,
            "list_labels" => {
                parse_args::<NoArgs>(args)?;
                self.list_labels().await
            }
            "get_label" => self.get_label(parse_args(args)?).await,
            "create_label" => self.create_label(parse_args(args)?).await,
            "update_label" => self.update_label(parse_args(args)?).await,
            "delete_label" => self.delete_label(parse_args(args)?).await,
            "get_or_create_label" => self.get_or_create_label(parse_args(args)?).await,
            "list_drafts" => self.list_drafts(parse_args(args)?).await,
            "get_draft" => self.get_draft(parse_args(args)?).await,
            "create_draft" => self.create_draft(parse_args(args)?).await,
            "update_draft" => self.update_draft(parse_args(args)?).await,
            "delete_draft" => self.delete_draft(parse_args(args)?).await,
            "send_draft" => self.send_draft(parse_args(args)?).await,
            _ => Err(GmailMcpError::Mcp(McpError::UnknownTool {
                name: name.to_string(),
            })),
        }
    }

    // ==================== Messages ====================

    async fn list_emails(&self, args: ListEmailsArgs) -> Result<CallToolResult> {
        let messages = self
            .gmail_client
            .list_messages(args.max_results, &args.label)
            .await?;

        let text = if messages.is_empty() {
            format!("No emails found with label '{}'.", args.label)
        } else {
            format!(
                "Found {} emails with label '{}':\n\n{}",
                messages.len(),
                args.label,
                render_summaries(&messages)
            )
        };

        Ok(CallToolResult::text(text).with_structured(json!({ "messages": messages })))
    }

    async fn get_email(&self, args: EmailIdArgs) -> Result<CallToolResult> {
        let message = self.gmail_client.get_message(&args.email_id).await?;
        Ok(CallToolResult::text(render_message(&message)).with_structured(to_value(&message)?))
    }

    async fn search_emails(&self, args: SearchEmailsArgs) -> Result<CallToolResult> {
        let messages = self
            .gmail_client
            .search_messages(&args.query, args.max_results)
            .await?;

        let text = if messages.is_empty() {
            format!("No emails found matching query '{}'.", args.query)
        } else {
            format!(
                "Found {} emails matching query '{}':\n\n{}",
                messages.len(),
                args.query,
                render_summaries(&messages)
            )
        };

        Ok(CallToolResult::text(text).with_structured(json!({ "messages": messages })))
    }

    async fn send_email(&self, args: SendEmailArgs) -> Result<CallToolResult> {
        let attachments = args
            .attachments
            .unwrap_or_default()
            .iter()
            .map(|path| load_attachment(path))
            .collect::<Result<Vec<_>>>()?;

        let params = EmailParams {
            to: parse_recipients(&args.to),
            cc: args.cc.as_deref().map(parse_recipients).unwrap_or_default(),
            bcc: args.bcc.as_deref().map(parse_recipients).unwrap_or_default(),
            subject: args.subject,
            body: args.body,
            html_body: args.html_body,
            attachments,
            ..Default::default()
        };

        let message_id = self.gmail_client.send_email(params).await?;
        Ok(sent(
            format!("Email sent successfully. Message ID: {}", message_id),
            &message_id,
        ))
    }

    async fn reply_to_email(&self, args: ReplyArgs) -> Result<CallToolResult> {
        let message_id = self
            .gmail_client
            .reply_to_message(&args.email_id, &args.body)
            .await?;
        Ok(sent(
            format!("Reply sent successfully. Message ID: {}", message_id),
            &message_id,
        ))
    }

    async fn delete_email(&self, args: EmailIdArgs) -> Result<CallToolResult> {
        self.gmail_client.delete_message(&args.email_id).await?;
        Ok(CallToolResult::text(format!(
            "Email with ID {} deleted successfully.",
            args.email_id
        ))
        .with_structured(json!({ "id": args.email_id, "success": true })))
    }

    async fn delete_emails(&self, args: DeleteEmailsArgs) -> Result<CallToolResult> {
        let report = self
            .gmail_client
            .batch_delete_messages(&args.email_ids)
            .await?;

        let text = if report.results.is_empty() {
            "No email ids given.".to_string()
        } else if report.failure_count == 0 {
            format!("All {} emails were deleted successfully.", report.success_count)
        } else if report.success_count == 0 {
            format!(
                "Failed to delete any emails: {}",
                report.failed_ids().join(", ")
            )
        } else {
            format!(
                "{} emails deleted successfully. {} emails failed to delete: {}",
                report.success_count,
                report.failure_count,
                report.failed_ids().join(", ")
            )
        };

        Ok(CallToolResult::text(text).with_structured(to_value(&report)?))
    }

    async fn modify_email_labels(&self, args: ModifyLabelsArgs) -> Result<CallToolResult> {
        let change = self
            .gmail_client
            .modify_message_labels(
                &args.email_id,
                args.add_label_ids.unwrap_or_default(),
                args.remove_label_ids.unwrap_or_default(),
            )
            .await?;

        Ok(CallToolResult::text(format!(
            "Labels updated for email {}. Current labels: {}",
            change.id,
            change.labels.join(", ")
        ))
        .with_structured(to_value(&change)?))
    }

    async fn download_attachment(&self, args: DownloadAttachmentArgs) -> Result<CallToolResult> {
        let data = self
            .gmail_client
            .get_attachment(&args.email_id, &args.attachment_id)
            .await?;

        let filename = match args.filename.as_deref() {
            Some(name) if !name.trim().is_empty() => sanitize_filename(name),
            _ => format!("attachment-{}", sanitize_filename(&args.attachment_id)),
        };
        let save_dir = args.save_dir.unwrap_or_else(|| ".".to_string());
        let full_path = Path::new(&save_dir).join(&filename);

        tokio::fs::create_dir_all(&save_dir).await?;
        tokio::fs::write(&full_path, &data).await?;
        info!(path = %full_path.display(), bytes = data.len(), "Saved attachment");

        Ok(CallToolResult::text(format!(
            "Attachment downloaded successfully:\nFile: {}\nSize: {}\nSaved to: {}",
            filename,
            format_size(data.len() as i64),
            full_path.display()
        ))
        .with_structured(json!({
            "path": full_path.display().to_string(),
            "size": data.len(),
        })))
    }

    // ==================== Labels ====================

    async fn list_labels(&self) -> Result<CallToolResult> {
        let result = self.gmail_client.labels().list().await?;
        let text = render_label_list(&result);
        let structured = json!({ "labels": to_value(&result.into_all())? });
        Ok(CallToolResult::text(text).with_structured(structured))
    }

    async fn get_label(&self, args: LabelIdArgs) -> Result<CallToolResult> {
        let label = self.gmail_client.labels().get(&args.label_id).await?;
        label_result("Label", &label)
    }

    async fn create_label(&self, args: CreateLabelArgs) -> Result<CallToolResult> {
        let label = self
            .gmail_client
            .labels()
            .create(
                &args.name,
                args.message_list_visibility,
                args.label_list_visibility,
            )
            .await?;
        label_result("Label created successfully", &label)
    }

    async fn update_label(&self, args: UpdateLabelArgs) -> Result<CallToolResult> {
        let updates = UpdateLabelRequest {
            name: args.name,
            message_list_visibility: args.message_list_visibility,
            label_list_visibility: args.label_list_visibility,
        };
        let label = self
            .gmail_client
            .labels()
            .update(&args.label_id, updates)
            .await?;
        label_result("Label updated successfully", &label)
    }

    async fn delete_label(&self, args: LabelIdArgs) -> Result<CallToolResult> {
        self.gmail_client.labels().delete(&args.label_id).await?;
        Ok(CallToolResult::text(format!(
            "Label with ID {} deleted successfully.",
            args.label_id
        ))
        .with_structured(json!({ "id": args.label_id, "success": true })))
    }

    async fn get_or_create_label(&self, args: LabelNameArgs) -> Result<CallToolResult> {
        let label = self.gmail_client.labels().get_or_create(&args.name).await?;
        label_result("Label", &label)
    }

    // ==================== Drafts ====================

    async fn list_drafts(&self, args: ListDraftsArgs) -> Result<CallToolResult> {
        let drafts = self.gmail_client.drafts().list(args.max_results).await?;

        let text = if drafts.is_empty() {
            "No drafts found.".to_string()
        } else {
            let mut text = format!("Found {} drafts:\n\n", drafts.len());
            for draft in &drafts {
                let summary = &draft.message.summary;
                text.push_str(&format!(
                    "Draft ID: {}\nTo: {}\nSubject: {}\n---\n",
                    draft.id, summary.to, summary.subject
                ));
            }
            text
        };

        Ok(CallToolResult::text(text).with_structured(json!({ "drafts": drafts })))
    }

    async fn get_draft(&self, args: DraftIdArgs) -> Result<CallToolResult> {
        let draft = self.gmail_client.drafts().get(&args.draft_id).await?;
        let text = format!("Draft ID: {}\n{}", draft.id, render_message(&draft.message));
        Ok(CallToolResult::text(text).with_structured(to_value(&draft)?))
    }

    async fn create_draft(&self, args: DraftContentArgs) -> Result<CallToolResult> {
        let params = draft_params(args.to, args.subject, args.body);
        let draft_id = self.gmail_client.drafts().create(&params).await?;
        Ok(CallToolResult::text(format!("Draft created successfully. Draft ID: {}", draft_id))
            .with_structured(json!({ "id": draft_id })))
    }

    async fn update_draft(&self, args: UpdateDraftArgs) -> Result<CallToolResult> {
        let params = draft_params(args.to, args.subject, args.body);
        let draft_id = self
            .gmail_client
            .drafts()
            .update(&args.draft_id, &params)
            .await?;
        Ok(CallToolResult::text(format!("Draft updated successfully. Draft ID: {}", draft_id))
            .with_structured(json!({ "id": draft_id })))
    }

    async fn delete_draft(&self, args: DraftIdArgs) -> Result<CallToolResult> {
        self.gmail_client.drafts().delete(&args.draft_id).await?;
        Ok(CallToolResult::text(format!(
            "Draft with ID {} deleted successfully.",
            args.draft_id
        ))
        .with_structured(json!({ "id": args.draft_id, "success": true })))
    }

    async fn send_draft(&self, args: DraftIdArgs) -> Result<CallToolResult> {
        let message_id = self.gmail_client.drafts().send(&args.draft_id).await?;
        Ok(sent(
            format!("Draft sent successfully. Message ID: {}", message_id),
            &message_id,
        ))
    }
}

// ==================== Helpers ====================

/// Deserialize then validate tool arguments. A missing arguments object is
/// treated as empty.
fn parse_args<T>(args: Value) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let args = if args.is_null() { json!({}) } else { args };
    let parsed: T = serde_json::from_value(args).map_err(|e| {
        GmailMcpError::Mcp(McpError::InvalidArguments {
            message: e.to_string(),
        })
    })?;
    parsed.validate().map_err(|e| {
        GmailMcpError::Mcp(McpError::InvalidArguments {
            message: e.to_string(),
        })
    })?;
    Ok(parsed)
}

fn tool_def<T: JsonSchema>(name: &str, description: &str) -> Tool {
    Tool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: input_schema::<T>(),
    }
}

/// Inline JSON schema for an argument struct
pub fn input_schema<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .into_generator();
    let schema = generator.into_root_schema_for::<T>();

    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| json!({}));
    if let Some(object) = value.as_object_mut() {
        object.remove("title");
        object.remove("definitions");
        object
            .entry("properties")
            .or_insert_with(|| json!({}));
        object.insert("type".to_string(), json!("object"));
    }
    value
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn sent(text: String, message_id: &str) -> CallToolResult {
    CallToolResult::text(text).with_structured(json!({ "id": message_id }))
}

fn draft_params(to: String, subject: String, body: String) -> EmailParams {
    EmailParams {
        to: parse_recipients(&to),
        subject,
        body,
        ..Default::default()
    }
}

fn label_result(heading: &str, label: &Label) -> Result<CallToolResult> {
    let text = format!(
        "{}:\nID: {}\nName: {}\nType: {}",
        heading,
        label.id,
        label.name,
        label.label_type.as_deref().unwrap_or("user")
    );
    Ok(CallToolResult::text(text).with_structured(to_value(label)?))
}

fn render_summaries(messages: &[MessageSummary]) -> String {
    let mut text = String::new();
    for message in messages {
        text.push_str(&format!(
            "ID: {}\nFrom: {}\nSubject: {}\nDate: {}\nStatus: {}\n---\n",
            message.id,
            message.from,
            message.subject,
            message.date,
            if message.read { "Read" } else { "Unread" }
        ));
    }
    text
}

fn render_message(message: &EmailMessage) -> String {
    let summary = &message.summary;
    let mut text = format!("From: {}\nTo: {}\n", summary.from, summary.to);
    if !message.cc.is_empty() {
        text.push_str(&format!("CC: {}\n", message.cc));
    }
    text.push_str(&format!(
        "Subject: {}\nDate: {}\nLabels: {}\nStatus: {}\n",
        summary.subject,
        summary.date,
        summary.labels.join(", "),
        if summary.read { "Read" } else { "Unread" }
    ));
    if message.is_html {
        text.push_str("[Note: only an HTML body is available]\n");
    }
    text.push('\n');
    text.push_str(&message.body);

    if !message.attachments.is_empty() {
        text.push_str(&format!("\n\nAttachments ({}):\n", message.attachments.len()));
        for a in &message.attachments {
            text.push_str(&format!(
                "- {} ({}, {}, ID: {})\n",
                a.filename,
                a.mime_type,
                format_size(a.size),
                a.id
            ));
        }
    }
    text
}

fn render_label_list(result: &LabelListResult) -> String {
    let mut text = format!(
        "Found {} labels ({} system, {} user):\n\n",
        result.total(),
        result.system.len(),
        result.user.len()
    );

    text.push_str("System Labels:\n");
    for label in &result.system {
        text.push_str(&format!("ID: {}\nName: {}\n\n", label.id, label.name));
    }

    text.push_str("\nUser Labels:\n");
    for label in &result.user {
        text.push_str(&format!("ID: {}\nName: {}\n\n", label.id, label.name));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::testing::{metadata_message, valid_tokens, Fixture};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn handler(fixture: &Fixture) -> ToolHandler {
        ToolHandler::new(Arc::new(fixture.client()))
    }

    #[test]
    fn test_schema_carries_defaults_and_required() {
        let schema = input_schema::<ListEmailsArgs>();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["max_results"]["default"], 10);
        assert_eq!(schema["properties"]["label"]["default"], "INBOX");
        assert!(schema.get("required").map_or(true, |r| r.as_array().unwrap().is_empty()));

        let schema = input_schema::<SendEmailArgs>();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("to")));
        assert!(required.contains(&json!("subject")));
        assert!(!required.contains(&json!("cc")));

        let schema = input_schema::<CreateLabelArgs>();
        assert_eq!(schema["properties"]["label_list_visibility"]["default"], "labelShow");
        assert_eq!(schema["properties"]["message_list_visibility"]["default"], "show");
    }

    #[test]
    fn test_no_args_schema_is_empty_object() {
        let schema = input_schema::<NoArgs>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_parse_args_validates_range() {
        let err = parse_args::<ListEmailsArgs>(json!({"max_results": 501})).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);

        let args = parse_args::<ListEmailsArgs>(Value::Null).unwrap();
        assert_eq!(args.max_results, 10);
        assert_eq!(args.label, "INBOX");

        assert!(parse_args::<EmailIdArgs>(json!({"email_id": ""})).is_err());
        assert!(parse_args::<EmailIdArgs>(json!({"email_id": 5})).is_err());
    }

    #[tokio::test]
    async fn test_every_tool_is_listed_once() {
        let names = [
            "list_emails", "get_email", "search_emails", "send_email", "reply_to_email",
            "delete_email", "delete_emails", "modify_email_labels", "download_attachment",
            "list_labels", "get_label", "create_label", "update_label", "delete_label",
            "get_or_create_label", "list_drafts", "get_draft", "create_draft", "update_draft",
            "delete_draft", "send_draft",
        ];
        let fixture = Fixture::start(Some(valid_tokens())).await;
        let tools = handler(&fixture).list_tools();

        assert_eq!(tools.len(), names.len());
        for name in names {
            assert_eq!(tools.iter().filter(|t| t.name == name).count(), 1, "{name}");
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_structured_failure() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        let result = handler(&fixture).call_tool("archive_all", json!({})).await;

        assert!(result.is_error);
        assert_eq!(result.structured_content.as_ref().unwrap()["kind"], "validation");
        assert!(result.first_text().unwrap().contains("archive_all"));
    }

    #[tokio::test]
    async fn test_list_emails_renders_summaries() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"id": "m1", "threadId": "t1"}]
            })))
            .mount(&fixture.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(metadata_message("m1", "Lunch", true)),
            )
            .mount(&fixture.server)
            .await;

        let result = handler(&fixture).call_tool("list_emails", json!({})).await;
        assert!(!result.is_error);
        let text = result.first_text().unwrap();
        assert!(text.starts_with("Found 1 emails with label 'INBOX':"));
        assert!(text.contains("Subject: Lunch\n"));
        assert!(text.contains("Status: Unread\n"));
        assert_eq!(
            result.structured_content.unwrap()["messages"][0]["id"],
            "m1"
        );
    }

    #[tokio::test]
    async fn test_adapter_error_becomes_failure_result() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&fixture.server)
            .await;

        let result = handler(&fixture)
            .call_tool("get_email", json!({"email_id": "gone"}))
            .await;
        assert!(result.is_error);
        let text = result.first_text().unwrap();
        assert!(text.starts_with("Error [not_found]: "));
        assert!(text.ends_with("message gone not found"));
    }

    #[tokio::test]
    async fn test_send_email_with_bad_recipient_makes_no_call() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&fixture.server)
            .await;

        let result = handler(&fixture)
            .call_tool(
                "send_email",
                json!({"to": "not-an-address", "subject": "Hi", "body": "x"}),
            )
            .await;
        assert!(result.is_error);
        assert_eq!(result.structured_content.unwrap()["kind"], "validation");
    }

    #[tokio::test]
    async fn test_download_attachment_writes_file() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1/attachments/a1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "size": 3,
                "data": "YWJj"
            })))
            .mount(&fixture.server)
            .await;

        let out = tempfile::tempdir().unwrap();
        let result = handler(&fixture)
            .call_tool(
                "download_attachment",
                json!({
                    "email_id": "m1",
                    "attachment_id": "a1",
                    "filename": "../notes.txt",
                    "save_dir": out.path().to_str().unwrap()
                }),
            )
            .await;

        assert!(!result.is_error, "{:?}", result.first_text());
        let saved = result.structured_content.unwrap()["path"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(saved.starts_with(out.path().to_str().unwrap()));
        assert_eq!(std::fs::read(saved).unwrap(), b"abc");
    }
}
