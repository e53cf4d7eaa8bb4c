//! Gmail API client
//!
//! High-level client for Gmail API operations. Every request goes through
//! [`GmailClient::send`], which attaches the current session, refreshes once
//! on a rejected token, maps HTTP failures onto the error taxonomy and
//! retries rate-limited or transient failures once.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use reqwest::header::{CONTENT_LENGTH, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::gmail::{MAX_BATCH_IDS, USER_ID};
use crate::error::{ErrorKind, GmailApiError, GmailMcpError, Result};
use crate::gmail::auth::Authenticator;
use crate::gmail::drafts::DraftManager;
use crate::gmail::labels::LabelManager;
use crate::gmail::types::*;
use crate::gmail::utils::{
    create_email_message, decode_base64url, encode_raw_message, flatten_message, merge_references,
    message_header, reply_subject, summarize_message, EmailParams,
};

const SUMMARY_HEADERS: &[&str] = &["From", "To", "Subject", "Date"];
const REPLY_HEADERS: &[&str] = &["Subject", "From", "Reply-To", "Message-ID", "References"];

/// Gmail API client
pub struct GmailClient {
    http_client: reqwest::Client,

    authenticator: Arc<Authenticator>,

    /// `{api_base}/users/me`
    user_url: String,

    retry_backoff: Duration,
}

impl GmailClient {
    /// Create a new Gmail client over an existing session owner
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        let config = authenticator.config();
        let user_url = format!("{}/users/{}", config.api_base_url, USER_ID);
        let retry_backoff = config.retry_backoff;
        Self {
            http_client: reqwest::Client::new(),
            authenticator,
            user_url,
            retry_backoff,
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.user_url, path)
    }

    /// URL of one item in `collection`, with `id` kept to a single path segment
    pub(crate) fn item_url(&self, collection: &str, field: &str, id: &str) -> Result<String> {
        Ok(self.url(&format!("{}/{}", collection, path_segment(field, id)?)))
    }

    pub fn labels(&self) -> LabelManager<'_> {
        LabelManager::new(self)
    }

    pub fn drafts(&self) -> DraftManager<'_> {
        DraftManager::new(self)
    }

    // ==================== Request execution ====================

    /// Execute a request and return the raw response body. `resource` names
    /// what a 404 refers to.
    pub(crate) async fn send<F>(&self, resource: &str, build: F) -> Result<String>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.execute(resource, Replay::Safe, &build).await
    }

    /// Execute a request that must not take effect twice. Only rate limiting
    /// is retried, since Gmail never acted on a rate-limited request.
    pub(crate) async fn send_once<F>(&self, resource: &str, build: F) -> Result<String>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.execute(resource, Replay::RateLimitOnly, &build).await
    }

    /// Execute a request and decode the JSON response
    pub(crate) async fn send_json<T, F>(&self, resource: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let body = self.send(resource, build).await?;
        decode_body(resource, &body)
    }

    /// [`send_once`](Self::send_once) with a JSON response
    pub(crate) async fn send_json_once<T, F>(&self, resource: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let body = self.send_once(resource, build).await?;
        decode_body(resource, &body)
    }

    async fn execute<F>(&self, resource: &str, replay: Replay, build: &F) -> Result<String>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let attempt = || async move { self.send_authorized(resource, build).await };

        attempt
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.retry_backoff)
                    .with_max_times(1),
            )
            .when(move |failure| failure.is_retryable(replay))
            .notify(|failure, delay| {
                warn!(resource, error = %failure.error(), ?delay, "Gmail request failed, retrying")
            })
            .await
            .map_err(Failure::into_error)
    }

    async fn send_authorized<F>(
        &self,
        resource: &str,
        build: &F,
    ) -> std::result::Result<String, Failure>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let session = self.authenticator.session().await.map_err(Failure::Session)?;
        let response = self
            .dispatch(build, &session.access_token)
            .await
            .map_err(Failure::Request)?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return read_response(response, resource)
                .await
                .map_err(Failure::Request);
        }

        let session = self
            .authenticator
            .refresh_after_rejection(&session)
            .await
            .map_err(Failure::Session)?;
        let response = self
            .dispatch(build, &session.access_token)
            .await
            .map_err(Failure::Request)?;
        read_response(response, resource)
            .await
            .map_err(Failure::Request)
    }

    async fn dispatch<F>(&self, build: &F, access_token: &str) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        Ok(build(&self.http_client)
            .bearer_auth(access_token)
            .send()
            .await?)
    }

    // ==================== Message Operations ====================

    /// List messages carrying `label` (all mail when empty)
    pub async fn list_messages(&self, max_results: u32, label: &str) -> Result<Vec<MessageSummary>> {
        let mut query = vec![("maxResults", max_results.to_string())];
        if !label.is_empty() {
            query.push(("labelIds", label.to_string()));
        }
        self.collect_summaries(max_results, &query).await
    }

    /// Search messages with Gmail query syntax
    pub async fn search_messages(&self, query: &str, max_results: u32) -> Result<Vec<MessageSummary>> {
        let query = vec![
            ("maxResults", max_results.to_string()),
            ("q", query.to_string()),
        ];
        self.collect_summaries(max_results, &query).await
    }

    async fn collect_summaries(
        &self,
        max_results: u32,
        query: &[(&str, String)],
    ) -> Result<Vec<MessageSummary>> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let list: MessageList = self
            .send_json("message list", |http| {
                http.get(self.url("messages")).query(query)
            })
            .await?;

        let mut results = Vec::with_capacity(list.messages.len());
        for msg_ref in list.messages.iter().take(max_results as usize) {
            match self.message_metadata(&msg_ref.id, SUMMARY_HEADERS).await {
                Ok(message) => results.push(summarize_message(&message)),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(message_id = %msg_ref.id, "Message disappeared while listing");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(results)
    }

    async fn message_metadata(&self, message_id: &str, headers: &[&str]) -> Result<Message> {
        let mut query = vec![("format", "metadata")];
        query.extend(headers.iter().map(|h| ("metadataHeaders", *h)));
        let query = &query;
        let url = self.item_url("messages", "email_id", message_id)?;

        self.send_json(&format!("message {}", message_id), |http| {
            http.get(&url).query(query)
        })
        .await
    }

    /// Get a message with parsed content
    pub async fn get_message(&self, message_id: &str) -> Result<EmailMessage> {
        let url = self.item_url("messages", "email_id", message_id)?;
        let message: Message = self
            .send_json(&format!("message {}", message_id), |http| {
                http.get(&url).query(&[("format", "full")])
            })
            .await?;

        Ok(flatten_message(&message))
    }

    /// Send an email, returning the new message id
    pub async fn send_email(&self, params: EmailParams) -> Result<String> {
        let raw_message = create_email_message(&params)?;
        let request = SendMessageRequest {
            raw: encode_raw_message(&raw_message),
            thread_id: params.thread_id,
        };

        let sent: Message = self
            .send_json_once("message", |http| {
                http.post(self.url("messages/send")).json(&request)
            })
            .await?;

        info!(message_id = %sent.id, recipients = params.to.len(), "Sent message");
        Ok(sent.id)
    }

    /// Reply in the original thread, returning the new message id
    pub async fn reply_to_message(&self, message_id: &str, body: &str) -> Result<String> {
        let original = self.message_metadata(message_id, REPLY_HEADERS).await?;

        let reply_to = match message_header(&original, "reply-to") {
            value if !value.trim().is_empty() => value,
            _ => message_header(&original, "from"),
        };
        if reply_to.trim().is_empty() {
            return Err(GmailMcpError::invalid_parameter(
                "email_id",
                format!("message {} has no sender to reply to", message_id),
            ));
        }

        let original_id = message_header(&original, "message-id");
        let (in_reply_to, references) = if original_id.is_empty() {
            warn!(message_id, "Original message has no Message-ID header");
            (None, None)
        } else {
            let existing = message_header(&original, "references");
            let references = merge_references(Some(&existing), &original_id);
            (Some(original_id), Some(references))
        };

        let params = EmailParams {
            to: vec![reply_to],
            subject: reply_subject(&message_header(&original, "subject")),
            body: body.to_string(),
            thread_id: original.thread_id.clone(),
            in_reply_to,
            references,
            ..Default::default()
        };

        self.send_email(params).await
    }

    /// Move a message to trash
    pub async fn delete_message(&self, message_id: &str) -> Result<()> {
        let url = format!("{}/trash", self.item_url("messages", "email_id", message_id)?);
        self.send(&format!("message {}", message_id), |http| {
            http.post(&url).header(CONTENT_LENGTH, "0")
        })
        .await?;

        info!(message_id, "Moved message to trash");
        Ok(())
    }

    /// Trash each id in order. Individual failures are recorded, never raised.
    pub async fn batch_delete_messages(&self, message_ids: &[String]) -> Result<BatchDeleteReport> {
        if message_ids.len() > MAX_BATCH_IDS {
            return Err(GmailMcpError::invalid_parameter(
                "email_ids",
                format!(
                    "at most {} ids per call, got {}",
                    MAX_BATCH_IDS,
                    message_ids.len()
                ),
            ));
        }

        let mut report = BatchDeleteReport::default();
        for message_id in message_ids {
            match self.delete_message(message_id).await {
                Ok(()) => report.push_success(message_id.clone()),
                Err(e) => {
                    warn!(message_id = %message_id, error = %e, "Failed to trash message");
                    report.push_failure(message_id.clone(), e.kind(), e.to_string());
                }
            }
        }

        info!(
            succeeded = report.success_count,
            failed = report.failure_count,
            "Batch delete finished"
        );
        Ok(report)
    }

    /// Add and remove labels on one message
    pub async fn modify_message_labels(
        &self,
        message_id: &str,
        add_label_ids: Vec<String>,
        remove_label_ids: Vec<String>,
    ) -> Result<LabelChange> {
        if add_label_ids.is_empty() && remove_label_ids.is_empty() {
            return Err(GmailMcpError::invalid_parameter(
                "add_label_ids",
                "at least one label must be added or removed",
            ));
        }

        let request = ModifyMessageRequest {
            add_label_ids,
            remove_label_ids,
        };

        let url = format!("{}/modify", self.item_url("messages", "email_id", message_id)?);
        let message: Message = self
            .send_json(&format!("message {}", message_id), |http| {
                http.post(&url).json(&request)
            })
            .await?;

        Ok(LabelChange {
            id: message.id,
            labels: message.label_ids,
        })
    }

    /// Download and decode an attachment
    pub async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/attachments/{}",
            self.item_url("messages", "email_id", message_id)?,
            path_segment("attachment_id", attachment_id)?
        );
        let attachment: AttachmentData = self
            .send_json(&format!("attachment {}", attachment_id), |http| http.get(&url))
            .await?;

        decode_base64url(&attachment.data)
    }
}

/// Which failures a request may be repeated after
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// Rate-limited and transient failures
    Safe,
    /// Rate limiting only. A lost response may hide an accepted request.
    RateLimitOnly,
}

/// A failed attempt, split by where it failed
enum Failure {
    /// Getting or refreshing the session failed. The authenticator has
    /// already spent its own retry on it.
    Session(GmailMcpError),
    /// Gmail or the transport failed the request itself
    Request(GmailMcpError),
}

impl Failure {
    fn is_retryable(&self, replay: Replay) -> bool {
        match (self, replay) {
            (Failure::Session(_), _) => false,
            (Failure::Request(e), Replay::Safe) => e.is_retryable(),
            (Failure::Request(e), Replay::RateLimitOnly) => e.kind() == ErrorKind::RateLimit,
        }
    }

    fn error(&self) -> &GmailMcpError {
        match self {
            Failure::Session(e) | Failure::Request(e) => e,
        }
    }

    fn into_error(self) -> GmailMcpError {
        match self {
            Failure::Session(e) | Failure::Request(e) => e,
        }
    }
}

/// Encode a caller-supplied id as one path segment. `.` and `..` would be
/// collapsed by URL parsing and are refused.
fn path_segment<'a>(field: &str, id: &'a str) -> Result<Cow<'a, str>> {
    if id.is_empty() {
        return Err(GmailMcpError::missing_field(field));
    }
    if id == "." || id == ".." {
        return Err(GmailMcpError::invalid_parameter(
            field,
            format!("'{}' is not a valid id", id),
        ));
    }
    Ok(urlencoding::encode(id))
}

fn decode_body<T: DeserializeOwned>(resource: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        GmailMcpError::Gmail(GmailApiError::RequestFailed {
            status: 200,
            message: format!("unexpected response for {}: {}", resource, e),
        })
    })
}

async fn read_response(response: reqwest::Response, resource: &str) -> Result<String> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await?;

    if status.is_success() {
        return Ok(body);
    }

    Err(GmailMcpError::Gmail(map_status(
        status,
        &body,
        resource,
        retry_after,
    )))
}

/// Translate a failed Gmail response. Only Gmail's own error message is kept.
fn map_status(
    status: StatusCode,
    body: &str,
    resource: &str,
    retry_after: Option<u64>,
) -> GmailApiError {
    let error = serde_json::from_str::<ApiErrorResponse>(body)
        .ok()
        .map(|r| r.error);
    let message = error
        .as_ref()
        .map(|e| e.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    let rate_limited = error.as_ref().map_or(false, |e| {
        e.has_reason("rateLimitExceeded") || e.has_reason("userRateLimitExceeded")
    });

    match status {
        StatusCode::UNAUTHORIZED => GmailApiError::Unauthorized,
        StatusCode::NOT_FOUND => GmailApiError::NotFound {
            resource: resource.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => GmailApiError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(1),
        },
        StatusCode::FORBIDDEN if rate_limited => GmailApiError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(1),
        },
        StatusCode::FORBIDDEN => GmailApiError::PermissionDenied { message },
        StatusCode::BAD_REQUEST => GmailApiError::BadRequest { message },
        StatusCode::CONFLICT => GmailApiError::Conflict { message },
        s if s.is_server_error() => GmailApiError::ServiceUnavailable {
            status: s.as_u16(),
            message,
        },
        s => GmailApiError::RequestFailed {
            status: s.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::gmail::testing::{expired_tokens, metadata_message, valid_tokens, Fixture};
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    #[test]
    fn test_map_status() {
        let kind = |status: u16, body: &str| {
            GmailMcpError::from(map_status(
                StatusCode::from_u16(status).unwrap(),
                body,
                "message m1",
                None,
            ))
            .kind()
        };
        let rate_body = r#"{"error":{"message":"Rate Limit Exceeded","errors":[{"reason":"rateLimitExceeded"}]}}"#;
        let denied_body = r#"{"error":{"message":"Insufficient Permission","errors":[{"reason":"insufficientPermissions"}]}}"#;

        assert_eq!(kind(404, ""), ErrorKind::NotFound);
        assert_eq!(kind(429, ""), ErrorKind::RateLimit);
        assert_eq!(kind(403, rate_body), ErrorKind::RateLimit);
        assert_eq!(kind(403, denied_body), ErrorKind::Permission);
        assert_eq!(kind(400, ""), ErrorKind::Validation);
        assert_eq!(kind(502, ""), ErrorKind::TransientNetwork);
        assert_eq!(kind(401, ""), ErrorKind::Authentication);
    }

    #[test]
    fn test_map_status_keeps_only_gmail_message() {
        let err = map_status(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Invalid label: Label_9"}}"#,
            "message m1",
            None,
        );
        assert_eq!(err.to_string(), "Rejected by Gmail: Invalid label: Label_9");

        let err = map_status(StatusCode::NOT_FOUND, "<html>", "message m1", None);
        assert_eq!(err.to_string(), "message m1 not found");
    }

    #[tokio::test]
    async fn test_list_zero_makes_no_calls() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&fixture.server)
            .await;

        let client = fixture.client();
        assert!(client.list_messages(0, "INBOX").await.unwrap().is_empty());
        assert!(client.search_messages("is:unread", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_messages_fetches_metadata() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("labelIds", "INBOX"))
            .and(query_param("maxResults", "2"))
            .and(header("authorization", "Bearer valid-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "m1", "threadId": "t1"}, {"id": "m2", "threadId": "t2"}]
            })))
            .expect(1)
            .mount(&fixture.server)
            .await;
        for (id, unread) in [("m1", true), ("m2", false)] {
            Mock::given(method("GET"))
                .and(path(format!("/gmail/v1/users/me/messages/{}", id)))
                .and(query_param("format", "metadata"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(metadata_message(id, "Status report", unread)),
                )
                .expect(1)
                .mount(&fixture.server)
                .await;
        }

        let summaries = fixture.client().list_messages(2, "INBOX").await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, "m1");
        assert_eq!(summaries[0].subject, "Status report");
        assert!(!summaries[0].read);
        assert!(summaries[1].read);
    }

    #[tokio::test]
    async fn test_send_email_rejects_empty_recipient_before_network() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&fixture.server)
            .await;

        let params = EmailParams {
            to: vec![],
            subject: "Hi".to_string(),
            body: "Body".to_string(),
            ..Default::default()
        };
        let err = fixture.client().send_email(params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_and_repeats_once() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/m1/trash"))
            .and(header("authorization", "Bearer valid-access"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&fixture.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "second-access",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&fixture.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/m1/trash"))
            .and(header("authorization", "Bearer second-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "m1"})))
            .expect(1)
            .mount(&fixture.server)
            .await;

        fixture.client().delete_message("m1").await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_session_refreshes_before_call() {
        let fixture = Fixture::start(Some(expired_tokens())).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "renewed",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&fixture.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/m1/trash"))
            .and(header("authorization", "Bearer renewed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "m1"})))
            .expect(1)
            .mount(&fixture.server)
            .await;

        fixture.client().delete_message("m1").await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_retried_once_then_surfaces() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&fixture.server)
            .await;

        let err = fixture.client().get_message("m1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimit);
    }

    #[tokio::test]
    async fn test_server_error_recovers_on_retry() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&fixture.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(metadata_message("m1", "Hello", false)),
            )
            .expect(1)
            .mount(&fixture.server)
            .await;

        let message = fixture.client().get_message("m1").await.unwrap();
        assert_eq!(message.summary.subject, "Hello");
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {"code": 404, "message": "Requested entity was not found."}
            })))
            .expect(1)
            .mount(&fixture.server)
            .await;

        let err = fixture.client().get_message("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("message missing"));
    }

    #[tokio::test]
    async fn test_refresh_failure_is_not_retried_by_client() {
        let fixture = Fixture::start(Some(expired_tokens())).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&fixture.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/m1/trash"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&fixture.server)
            .await;

        let err = fixture.client().delete_message("m1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
    }

    fn outgoing() -> EmailParams {
        EmailParams {
            to: vec!["bob@example.com".to_string()],
            subject: "Invoice".to_string(),
            body: "Attached.".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_not_repeated_after_server_error() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&fixture.server)
            .await;

        let err = fixture.client().send_email(outgoing()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
    }

    #[tokio::test]
    async fn test_send_retried_after_rate_limit() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&fixture.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "sent-1"})))
            .expect(1)
            .mount(&fixture.server)
            .await;

        let id = fixture.client().send_email(outgoing()).await.unwrap();
        assert_eq!(id, "sent-1");
    }

    #[tokio::test]
    async fn test_ids_stay_in_one_path_segment() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("DELETE"))
            .and(path("/gmail/v1/users/me/messages/victim"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&fixture.server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/gmail/v1/users/me/drafts/..%2Fmessages%2Fvictim"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&fixture.server)
            .await;

        let client = fixture.client();
        let err = client.drafts().delete("../messages/victim").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_dot_ids_rejected_before_network() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&fixture.server)
            .await;

        let client = fixture.client();
        assert_eq!(
            client.get_message("..").await.unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            client.drafts().delete(".").await.unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            client.labels().get("").await.unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[tokio::test]
    async fn test_batch_delete_reports_each_id() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/bad/trash"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&fixture.server)
            .await;
        Mock::given(method("POST"))
            .and(wiremock::matchers::path_regex(r"^/gmail/v1/users/me/messages/[^/]+/trash$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "x"})))
            .mount(&fixture.server)
            .await;

        let ids: Vec<String> = ["a", "bad", "c", "d"].iter().map(|s| s.to_string()).collect();
        let report = fixture.client().batch_delete_messages(&ids).await.unwrap();

        assert_eq!(report.results.len(), 4);
        assert_eq!(report.success_count, 3);
        assert_eq!(report.failure_count, 1);
        assert_eq!(report.failed_ids(), vec!["bad"]);
        let order: Vec<&str> = report.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["a", "bad", "c", "d"]);
        assert_eq!(report.results[1].error.as_ref().unwrap().kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_batch_delete_limits() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        let client = fixture.client();

        let empty = client.batch_delete_messages(&[]).await.unwrap();
        assert!(empty.results.is_empty());

        let too_many: Vec<String> = (0..=MAX_BATCH_IDS).map(|i| i.to_string()).collect();
        let err = client.batch_delete_messages(&too_many).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_reply_threads_and_prefixes_subject() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/orig"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "orig",
                "threadId": "thread-9",
                "payload": {"headers": [
                    {"name": "Subject", "value": "Budget"},
                    {"name": "From", "value": "Ann <ann@example.com>"},
                    {"name": "Reply-To", "value": "team@example.com"},
                    {"name": "Message-ID", "value": "<orig@mail.example.com>"},
                    {"name": "References", "value": "<root@mail.example.com>"}
                ]}
            })))
            .mount(&fixture.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .and(body_string_contains("\"threadId\":\"thread-9\""))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "reply-1", "threadId": "thread-9"})),
            )
            .expect(1)
            .mount(&fixture.server)
            .await;

        let id = fixture
            .client()
            .reply_to_message("orig", "Sounds good")
            .await
            .unwrap();
        assert_eq!(id, "reply-1");

        let requests = fixture.server.received_requests().await.unwrap();
        let sent = requests
            .iter()
            .find(|r| r.url.path().ends_with("/messages/send"))
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&sent.body).unwrap();
        let raw = decode_base64url(body["raw"].as_str().unwrap()).unwrap();
        let raw = String::from_utf8(raw).unwrap();
        assert!(raw.contains("To: team@example.com\r\n"));
        assert!(raw.contains("Subject: Re: Budget\r\n"));
        assert!(raw.contains("In-Reply-To: <orig@mail.example.com>\r\n"));
        assert!(raw.contains("References: <root@mail.example.com> <orig@mail.example.com>\r\n"));
    }

    #[tokio::test]
    async fn test_modify_labels_requires_change() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        let err = fixture
            .client()
            .modify_message_labels("m1", vec![], vec![])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_get_attachment_decodes() {
        let fixture = Fixture::start(Some(valid_tokens())).await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1/attachments/att-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "size": 5,
                "data": encode_raw_message("hello")
            })))
            .mount(&fixture.server)
            .await;

        let bytes = fixture.client().get_attachment("m1", "att-1").await.unwrap();
        assert_eq!(bytes, b"hello");
    }
}
