//! Gmail utility functions
//!
//! Email composition, validation, and content extraction utilities.

use std::path::Path;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};

use crate::config::gmail::labels::UNREAD;
use crate::error::{GmailMcpError, Result, ValidationError};
use crate::gmail::types::{EmailAttachment, EmailContent, EmailMessage, Message, MessagePart, MessageSummary};

/// Validate an email address, accepting the `Name <addr>` form
pub fn validate_email(email: &str) -> bool {
    if email.chars().any(|c| c.is_control()) {
        return false;
    }
    let email = address_part(email);

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }
    let (local, domain) = (parts[0], parts[1]);

    !local.is_empty()
        && !domain.is_empty()
        && !local.contains(' ')
        && !domain.contains(' ')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// The bare address of `Name <addr>`, or the trimmed input
fn address_part(value: &str) -> &str {
    let value = value.trim();
    match (value.rfind('<'), value.rfind('>')) {
        (Some(start), Some(end)) if start < end => &value[start + 1..end],
        _ => value,
    }
}

/// Split a comma separated recipient list
pub fn parse_recipients(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Encode text for MIME header (RFC 2047)
pub fn encode_mime_header(text: &str) -> String {
    if text.chars().all(|c| c.is_ascii() && c != '\r' && c != '\n') {
        return text.to_string();
    }

    format!("=?UTF-8?B?{}?=", STANDARD.encode(text.as_bytes()))
}

/// Encode a raw email message for Gmail API (base64url, no padding)
pub fn encode_raw_message(message: &str) -> String {
    URL_SAFE_NO_PAD.encode(message.as_bytes())
}

/// Decode base64url data from Gmail API, with or without padding
pub fn decode_base64url(data: &str) -> Result<Vec<u8>> {
    let trimmed = data.trim().trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD.decode(data.trim()))
        .map_err(|e| GmailMcpError::invalid_parameter("base64 data", e.to_string()))
}

/// Decode base64url data to string
pub fn decode_base64url_string(data: &str) -> Result<String> {
    let bytes = decode_base64url(data)?;
    String::from_utf8(bytes)
        .map_err(|e| GmailMcpError::invalid_parameter("UTF-8 content", e.to_string()))
}

/// Recursively extract email body content from MIME message parts
pub fn extract_email_content(message_part: &MessagePart) -> EmailContent {
    let mut content = EmailContent::default();

    let mime_type = message_part.mime_type.as_deref().unwrap_or("");

    if let Some(data) = message_part.body.as_ref().and_then(|b| b.data.as_ref()) {
        // Only decode text-based content, skip binary attachments
        if mime_type.starts_with("text/") {
            match decode_base64url(data) {
                Ok(bytes) => {
                    let decoded = String::from_utf8_lossy(&bytes).into_owned();
                    if mime_type == "text/plain" {
                        content.text = decoded;
                    } else if mime_type == "text/html" {
                        content.html = decoded;
                    }
                }
                Err(e) => tracing::debug!(mime_type, error = %e, "Failed to decode part"),
            }
        }
    }

    for part in &message_part.parts {
        // Attached text files are not the body.
        if part.filename.as_deref().map_or(false, |f| !f.is_empty()) {
            continue;
        }
        let nested = extract_email_content(part);
        if !nested.text.is_empty() {
            if !content.text.is_empty() {
                content.text.push_str("\n---\n");
            }
            content.text.push_str(&nested.text);
        }
        if !nested.html.is_empty() {
            if !content.html.is_empty() {
                content.html.push_str("\n---\n");
            }
            content.html.push_str(&nested.html);
        }
    }

    content
}

/// Extract attachment information from message parts
pub fn extract_attachments(message_part: &MessagePart) -> Vec<EmailAttachment> {
    let mut attachments = Vec::new();
    extract_attachments_recursive(message_part, &mut attachments);
    attachments
}

fn extract_attachments_recursive(part: &MessagePart, attachments: &mut Vec<EmailAttachment>) {
    if let Some(ref body) = part.body {
        if let Some(ref attachment_id) = body.attachment_id {
            let filename = part
                .filename
                .clone()
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| format!("attachment-{}", attachment_id));

            attachments.push(EmailAttachment {
                id: attachment_id.clone(),
                filename,
                mime_type: part
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                size: body.size,
            });
        }
    }

    for subpart in &part.parts {
        extract_attachments_recursive(subpart, attachments);
    }
}

/// Find header value by name (case-insensitive)
pub fn find_header<'a>(part: &'a MessagePart, name: &str) -> Option<&'a str> {
    part.headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Header value from a message, empty when absent
pub fn message_header(message: &Message, name: &str) -> String {
    message
        .payload
        .as_ref()
        .and_then(|p| find_header(p, name))
        .unwrap_or("")
        .to_string()
}

/// Flatten message metadata into a listing entry
pub fn summarize_message(message: &Message) -> MessageSummary {
    MessageSummary {
        id: message.id.clone(),
        thread_id: message.thread_id.clone().unwrap_or_default(),
        from: message_header(message, "from"),
        to: message_header(message, "to"),
        subject: message_header(message, "subject"),
        date: message_header(message, "date"),
        snippet: message.snippet.clone().unwrap_or_default(),
        labels: message.label_ids.clone(),
        read: !message.label_ids.iter().any(|l| l == UNREAD),
    }
}

/// Flatten a `format=full` message. The body prefers plain text, then HTML,
/// then the snippet.
pub fn flatten_message(message: &Message) -> EmailMessage {
    let summary = summarize_message(message);
    let payload = message.payload.as_ref();

    let content = payload.map(extract_email_content).unwrap_or_default();
    let attachments = payload.map(extract_attachments).unwrap_or_default();

    let (body, is_html) = if !content.text.is_empty() {
        (content.text, false)
    } else if !content.html.is_empty() {
        (content.html, true)
    } else {
        tracing::debug!(message_id = %message.id, "Body extraction returned empty, using snippet");
        (summary.snippet.clone(), false)
    };

    EmailMessage {
        cc: message_header(message, "cc"),
        summary,
        body,
        is_html,
        attachments,
    }
}

/// `Re: ` prefixed subject unless it already carries one
pub fn reply_subject(original: &str) -> String {
    let prefix = original.trim_start().get(..3);
    if prefix.map_or(false, |p| p.eq_ignore_ascii_case("re:")) {
        original.to_string()
    } else {
        format!("Re: {}", original)
    }
}

/// Append `message_id` to an existing References value without duplicating it
pub fn merge_references(existing: Option<&str>, message_id: &str) -> String {
    let existing = existing.unwrap_or("").trim();
    if existing.split_whitespace().any(|r| r == message_id) {
        existing.to_string()
    } else if existing.is_empty() {
        message_id.to_string()
    } else {
        format!("{} {}", existing, message_id)
    }
}

/// Keep only the final path component so a remote filename cannot escape
/// the target directory
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "attachment".to_string(),
        _ => cleaned,
    }
}

/// File to attach to an outgoing message
#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Parameters for creating an email message
#[derive(Debug, Clone, Default)]
pub struct EmailParams {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
    pub thread_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub attachments: Vec<OutgoingAttachment>,
}

impl EmailParams {
    /// Recipient checks done before anything is sent
    pub fn validate(&self) -> Result<()> {
        if self.to.is_empty() {
            return Err(GmailMcpError::missing_field("to"));
        }
        for email in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            if !validate_email(email) {
                return Err(GmailMcpError::Validation(ValidationError::InvalidEmail {
                    email: email.clone(),
                }));
            }
        }
        Ok(())
    }
}

/// Load an attachment from a file path
pub fn load_attachment(path: &str) -> Result<OutgoingAttachment> {
    let path = Path::new(path);
    if !path.is_file() {
        return Err(GmailMcpError::Validation(ValidationError::FileNotFound {
            path: path.display().to_string(),
        }));
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "attachment".to_string());

    let data = std::fs::read(path)?;

    let mime_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
    .to_string();

    Ok(OutgoingAttachment {
        filename,
        mime_type,
        data,
    })
}

/// Build an RFC 5322 message from `params`
pub fn create_email_message(params: &EmailParams) -> Result<String> {
    params.validate()?;

    let mut lines = Vec::new();

    lines.push(format!("To: {}", params.to.join(", ")));
    if !params.cc.is_empty() {
        lines.push(format!("Cc: {}", params.cc.join(", ")));
    }
    if !params.bcc.is_empty() {
        lines.push(format!("Bcc: {}", params.bcc.join(", ")));
    }
    lines.push(format!("Subject: {}", encode_mime_header(&params.subject)));

    if let Some(ref in_reply_to) = params.in_reply_to {
        lines.push(format!("In-Reply-To: {}", in_reply_to));
    }
    if let Some(ref references) = params.references {
        lines.push(format!("References: {}", references));
    }

    lines.push("MIME-Version: 1.0".to_string());

    if params.attachments.is_empty() {
        push_body(&mut lines, params);
    } else {
        let mixed_boundary = format!("----=_MixedPart_{}", generate_boundary());
        lines.push(format!(
            "Content-Type: multipart/mixed; boundary=\"{}\"",
            mixed_boundary
        ));
        lines.push(String::new());

        lines.push(format!("--{}", mixed_boundary));
        push_body(&mut lines, params);
        lines.push(String::new());

        for attachment in &params.attachments {
            let name = encode_mime_header(&attachment.filename);
            lines.push(format!("--{}", mixed_boundary));
            lines.push(format!(
                "Content-Type: {}; name=\"{}\"",
                attachment.mime_type, name
            ));
            lines.push("Content-Transfer-Encoding: base64".to_string());
            lines.push(format!(
                "Content-Disposition: attachment; filename=\"{}\"",
                name
            ));
            lines.push(String::new());
            push_base64_lines(&mut lines, &attachment.data);
            lines.push(String::new());
        }

        lines.push(format!("--{}--", mixed_boundary));
    }

    Ok(lines.join("\r\n"))
}

/// Plain body, or multipart/alternative when an HTML body is present
fn push_body(lines: &mut Vec<String>, params: &EmailParams) {
    match params.html_body {
        Some(ref html) => {
            let boundary = format!("----=_AltPart_{}", generate_boundary());
            lines.push(format!(
                "Content-Type: multipart/alternative; boundary=\"{}\"",
                boundary
            ));
            lines.push(String::new());

            lines.push(format!("--{}", boundary));
            push_text_part(lines, "text/plain", &params.body);
            lines.push(String::new());

            lines.push(format!("--{}", boundary));
            push_text_part(lines, "text/html", html);
            lines.push(String::new());

            lines.push(format!("--{}--", boundary));
        }
        None => push_text_part(lines, "text/plain", &params.body),
    }
}

fn push_text_part(lines: &mut Vec<String>, mime_type: &str, text: &str) {
    lines.push(format!("Content-Type: {}; charset=UTF-8", mime_type));
    if text.is_ascii() {
        lines.push("Content-Transfer-Encoding: 7bit".to_string());
        lines.push(String::new());
        lines.push(text.to_string());
    } else {
        lines.push("Content-Transfer-Encoding: base64".to_string());
        lines.push(String::new());
        push_base64_lines(lines, text.as_bytes());
    }
}

/// Base64 wrapped at 76 columns
fn push_base64_lines(lines: &mut Vec<String>, data: &[u8]) {
    let encoded = STANDARD.encode(data);
    for chunk in encoded.as_bytes().chunks(76) {
        lines.push(String::from_utf8_lossy(chunk).to_string());
    }
}

fn generate_boundary() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Format file size for display
pub fn format_size(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
