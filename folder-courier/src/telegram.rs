#![doc = "Telegram Bot API messenger: bridges the core Messenger trait to the Bot API."]
//
//! # Telegram Messenger
//!
//! [`TelegramMessenger`] implements [`Messenger`] over `reqwest` multipart requests:
//!
//! - singles go through `sendPhoto` / `sendDocument`
//! - batches go through `sendMediaGroup`; the Bot API needs 2 to 10 media per group, so a
//!   one-item batch is sent with the single-item method instead
//! - topics are forum topics (`createForumTopic`), headers are plain `sendMessage` calls
//!
//! Files are opened and streamed inside each call, so a retried call re-opens the file, no
//! handle survives an attempt and a whole group is never buffered in memory. Every failure is
//! mapped onto the tagged [`TransportError`] so the core retry engine can decide what to do
//! with it.

use std::time::Duration;

use async_trait::async_trait;
use folder_courier_core::contract::{
    BatchSend, MediaKind, MessageId, Messenger, OutgoingMedia, SingleSend, TopicId, TransportError,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::load_config::{TelegramCredentials, TelegramSection};

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ForumTopic {
    message_thread_id: i64,
}

/// One entry of the `media` JSON array of `sendMediaGroup`.
#[derive(Debug, Serialize)]
struct InputMedia {
    #[serde(rename = "type")]
    kind: &'static str,
    media: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
}

pub struct TelegramMessenger {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramMessenger {
    pub fn new(
        credentials: &TelegramCredentials,
        section: &TelegramSection,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(section.request_timeout_secs))
            .build()?;
        tracing::info!(
            chat_id = %credentials.chat_id,
            api_base = %section.api_base,
            timeout_secs = section.request_timeout_secs,
            "Initialized TelegramMessenger"
        );
        Ok(Self {
            client,
            api_base: section.api_base.trim_end_matches('/').to_string(),
            token: credentials.bot_token.clone(),
            chat_id: credentials.chat_id.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn base_form(&self, topic: Option<TopicId>) -> Form {
        let form = Form::new().text("chat_id", self.chat_id.clone());
        match topic {
            Some(topic) => form.text("message_thread_id", topic.0.to_string()),
            None => form,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        form: Form,
    ) -> Result<T, TransportError> {
        tracing::debug!(method, "Calling Bot API");
        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        let body: ApiResponse<T> = match response.json().await {
            Ok(body) => body,
            Err(_) if status.is_server_error() => {
                return Err(TransportError::Transient(format!("{method}: HTTP {status}")));
            }
            Err(e) => return Err(map_request_error(e)),
        };

        if body.ok {
            return body
                .result
                .ok_or_else(|| TransportError::Fatal(format!("{method}: response without result")));
        }

        let description = body.description.unwrap_or_default();
        let retry_after = body.parameters.and_then(|p| p.retry_after);
        let err = map_api_failure(status, &description, retry_after);
        tracing::warn!(
            method,
            status = status.as_u16(),
            description = %description,
            error = %err,
            "Bot API call failed"
        );
        Err(err)
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_single(&self, req: SingleSend) -> Result<MessageId, TransportError> {
        let (method, field) = match req.kind {
            MediaKind::Image => ("sendPhoto", "photo"),
            MediaKind::Document => ("sendDocument", "document"),
        };
        let mut form = self.base_form(req.topic).part(field, file_part(&req.media).await?);
        if let Some(caption) = &req.media.caption {
            form = form
                .text("caption", code_caption(caption))
                .text("parse_mode", "HTML");
        }
        let message: Message = self.call(method, form).await?;
        Ok(MessageId(message.message_id))
    }

    async fn send_batch(&self, req: BatchSend) -> Result<Vec<MessageId>, TransportError> {
        if req.media.len() < 2 {
            let BatchSend { kind, media, topic } = req;
            let Some(media) = media.into_iter().next() else {
                return Err(TransportError::Fatal("empty batch".to_string()));
            };
            let id = self.send_single(SingleSend { kind, media, topic }).await?;
            return Ok(vec![id]);
        }

        let kind = match req.kind {
            MediaKind::Image => "photo",
            MediaKind::Document => "document",
        };
        let mut form = self.base_form(req.topic);
        let mut entries = Vec::with_capacity(req.media.len());
        for (i, media) in req.media.iter().enumerate() {
            let attach = format!("file{i}");
            form = form.part(attach.clone(), file_part(media).await?);
            entries.push(InputMedia {
                kind,
                media: format!("attach://{attach}"),
                caption: media.caption.as_deref().map(code_caption),
                parse_mode: media.caption.as_ref().map(|_| "HTML"),
            });
        }
        let entries = serde_json::to_string(&entries)
            .map_err(|e| TransportError::Fatal(format!("could not encode media group: {e}")))?;
        form = form.text("media", entries);

        let messages: Vec<Message> = self.call("sendMediaGroup", form).await?;
        Ok(messages.into_iter().map(|m| MessageId(m.message_id)).collect())
    }

    async fn create_topic(&self, name: String) -> Result<TopicId, TransportError> {
        let form = self.base_form(None).text("name", name);
        let topic: ForumTopic = self.call("createForumTopic", form).await?;
        Ok(TopicId(topic.message_thread_id))
    }

    async fn send_text(
        &self,
        text: String,
        topic: Option<TopicId>,
    ) -> Result<MessageId, TransportError> {
        let form = self.base_form(topic).text("text", text);
        let message: Message = self.call("sendMessage", form).await?;
        Ok(MessageId(message.message_id))
    }
}

/// Streams the file from disk; the handle lives as long as the request body.
async fn file_part(media: &OutgoingMedia) -> Result<Part, TransportError> {
    let unreadable = |e: std::io::Error| {
        TransportError::Fatal(format!("could not read {}: {e}", media.path.display()))
    };
    let file = tokio::fs::File::open(&media.path).await.map_err(unreadable)?;
    let length = file.metadata().await.map_err(unreadable)?.len();
    Ok(Part::stream_with_length(Body::from(file), length).file_name(media.file_name.clone()))
}

/// Escape text for HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn code_caption(text: &str) -> String {
    format!("<code>{}</code>", escape_html(text))
}

fn map_request_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
        TransportError::Transient(e.to_string())
    } else if e.status().is_some_and(|s| s.is_server_error()) {
        TransportError::Transient(e.to_string())
    } else {
        TransportError::Fatal(e.to_string())
    }
}

/// Map an unsuccessful Bot API reply onto a [`TransportError`].
pub fn map_api_failure(
    status: StatusCode,
    description: &str,
    retry_after: Option<u64>,
) -> TransportError {
    let lower = description.to_lowercase();
    if status == StatusCode::TOO_MANY_REQUESTS || retry_after.is_some() {
        return TransportError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(1),
        };
    }
    if status.is_server_error() {
        return TransportError::Transient(format!("HTTP {status}: {description}"));
    }
    if lower.contains("not a forum") || lower.contains("topics are disabled") {
        return TransportError::NotSupported(description.to_string());
    }
    if status == StatusCode::FORBIDDEN || lower.contains("not enough rights") {
        return TransportError::PermissionDenied(description.to_string());
    }
    TransportError::Fatal(format!("HTTP {status}: {description}"))
}
