//! Bot API client
//!
//! Thin `reqwest` wrapper over the Bot API methods the bot uses. Sticker set
//! methods back the core [`ContainerClient`] and file downloads back
//! [`MediaSource`].

use super::types::{
    ApiResponse, File, InlineKeyboardMarkup, Message, StickerSet, Update, User,
};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use stickerstash_core::{
    ContainerClient, ContainerError, MediaSource, ShardMetadata, StickerItem, StickerPayload,
};
use tracing::{debug, trace};

/// Multipart field name of an uploaded sticker file.
const UPLOAD_FIELD: &str = "sticker_file";

/// Updates the bot subscribes to.
pub const ALLOWED_UPDATES: [&str; 3] = ["message", "callback_query", "my_chat_member"];

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    request_timeout: Duration,
}

fn transport(e: reqwest::Error) -> ContainerError {
    ContainerError::Transport(e.to_string())
}

/// Map an unsuccessful Bot API response to a container error.
fn api_error(code: i64, description: String, retry_after: Option<u64>) -> ContainerError {
    match code {
        403 => ContainerError::Forbidden(description),
        429 => ContainerError::RateLimited { retry_after },
        _ => ContainerError::Rejected { code, description },
    }
}

fn input_sticker(item: &StickerItem) -> serde_json::Value {
    let sticker = match &item.payload {
        StickerPayload::FileId(file_id) => file_id.clone(),
        StickerPayload::Upload(_) => format!("attach://{UPLOAD_FIELD}"),
    };
    json!({
        "sticker": sticker,
        "format": if item.is_animated { "animated" } else { "static" },
        "emoji_list": [item.emoji],
    })
}

fn attach_upload(form: Form, item: &StickerItem) -> Result<Form, ContainerError> {
    match &item.payload {
        StickerPayload::FileId(_) => Ok(form),
        StickerPayload::Upload(bytes) => {
            let part = Part::bytes(bytes.clone())
                .file_name("sticker.png")
                .mime_str("image/png")
                .map_err(transport)?;
            Ok(form.part(UPLOAD_FIELD, part))
        }
    }
}

impl TelegramClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ContainerError> {
        let http = reqwest::Client::builder()
            .user_agent(crate::version::user_agent())
            .build()
            .map_err(transport)?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            request_timeout,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.base_url, self.token, file_path)
    }

    async fn unwrap_response<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, ContainerError> {
        let status = response.status();
        let body: ApiResponse<T> = response.json().await.map_err(|e| {
            ContainerError::Transport(format!("{method}: unreadable response ({status}): {e}"))
        })?;

        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            _ => {
                let code = body.error_code.unwrap_or_else(|| i64::from(status.as_u16()));
                let description = body
                    .description
                    .unwrap_or_else(|| format!("{method} failed"));
                let retry_after = body.parameters.and_then(|p| p.retry_after);
                debug!(method, code, description = %description, "Bot API call rejected");
                Err(api_error(code, description, retry_after))
            }
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &impl Serialize,
    ) -> Result<T, ContainerError> {
        self.call_with_timeout(method, params, self.request_timeout)
            .await
    }

    async fn call_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &impl Serialize,
        timeout: Duration,
    ) -> Result<T, ContainerError> {
        trace!(method, "Bot API call");
        let response = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(params)
            .send()
            .await
            .map_err(transport)?;
        Self::unwrap_response(method, response).await
    }

    async fn call_multipart<T: DeserializeOwned>(
        &self,
        method: &str,
        form: Form,
    ) -> Result<T, ContainerError> {
        trace!(method, "Bot API multipart call");
        let response = self
            .http
            .post(self.method_url(method))
            .timeout(self.request_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        Self::unwrap_response(method, response).await
    }

    pub async fn get_me(&self) -> Result<User, ContainerError> {
        self.call("getMe", &json!({})).await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        poll_timeout: Duration,
    ) -> Result<Vec<Update>, ContainerError> {
        let params = json!({
            "offset": offset,
            "timeout": poll_timeout.as_secs(),
            "allowed_updates": ALLOWED_UPDATES,
        });
        // The HTTP timeout must outlast the server-side long poll.
        self.call_with_timeout("getUpdates", &params, poll_timeout + self.request_timeout)
            .await
    }

    /// Send an HTML formatted message, optionally with an inline keyboard.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, ContainerError> {
        let mut params = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "link_preview_options": {"is_disabled": true},
        });
        if let Some(keyboard) = keyboard {
            params["reply_markup"] = json!(keyboard);
        }
        self.call("sendMessage", &params).await
    }

    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<(), ContainerError> {
        let _: bool = self
            .call("sendChatAction", &json!({"chat_id": chat_id, "action": action}))
            .await?;
        Ok(())
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), ContainerError> {
        let mut params = json!({"callback_query_id": callback_query_id});
        if let Some(text) = text {
            params["text"] = json!(text);
        }
        let _: bool = self.call("answerCallbackQuery", &params).await?;
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ContainerError> {
        let _: bool = self
            .call(
                "deleteMessage",
                &json!({"chat_id": chat_id, "message_id": message_id}),
            )
            .await?;
        Ok(())
    }

    pub async fn get_file(&self, file_id: &str) -> Result<File, ContainerError> {
        self.call("getFile", &json!({"file_id": file_id})).await
    }

    /// Download a file from the Bot API file endpoint, reading at most
    /// `max_bytes`.
    pub async fn download(&self, file_path: &str, max_bytes: u64) -> Result<Vec<u8>, ContainerError> {
        let mut response = self
            .http
            .get(self.file_url(file_path))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(api_error(
                i64::from(response.status().as_u16()),
                format!("file download failed: {}", response.status()),
                None,
            ));
        }
        if let Some(size) = response.content_length().filter(|size| *size > max_bytes) {
            return Err(ContainerError::TooLarge {
                size,
                limit: max_bytes,
            });
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 > max_bytes {
                return Err(ContainerError::TooLarge {
                    size: bytes.len() as u64,
                    limit: max_bytes,
                });
            }
        }
        Ok(bytes)
    }

    /// `None` when no set with this name exists.
    pub async fn get_sticker_set(&self, name: &str) -> Result<Option<StickerSet>, ContainerError> {
        match self.call("getStickerSet", &json!({"name": name})).await {
            Ok(set) => Ok(Some(set)),
            Err(ContainerError::Rejected { description, .. })
                if description.contains("STICKERSET_INVALID") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn add_sticker_to_set(
        &self,
        user_id: u64,
        name: &str,
        item: &StickerItem,
    ) -> Result<(), ContainerError> {
        let form = Form::new()
            .text("user_id", user_id.to_string())
            .text("name", name.to_string())
            .text("sticker", input_sticker(item).to_string());
        let form = attach_upload(form, item)?;

        match self.call_multipart::<bool>("addStickerToSet", form).await {
            Ok(_) => Ok(()),
            Err(ContainerError::Rejected { description, .. })
                if description.contains("STICKERS_TOO_MUCH") =>
            {
                Err(ContainerError::CapacityExceeded {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn create_new_sticker_set(
        &self,
        user_id: u64,
        name: &str,
        title: &str,
        item: &StickerItem,
    ) -> Result<(), ContainerError> {
        let form = Form::new()
            .text("user_id", user_id.to_string())
            .text("name", name.to_string())
            .text("title", title.to_string())
            .text("sticker_type", "regular")
            .text("stickers", json!([input_sticker(item)]).to_string());
        let form = attach_upload(form, item)?;

        let _: bool = self.call_multipart("createNewStickerSet", form).await?;
        Ok(())
    }
}

#[async_trait]
impl ContainerClient for TelegramClient {
    async fn get_container(&self, name: &str) -> Result<Option<ShardMetadata>, ContainerError> {
        Ok(self.get_sticker_set(name).await?.map(|set| set.metadata()))
    }

    async fn append_item(
        &self,
        owner_id: u64,
        name: &str,
        item: &StickerItem,
    ) -> Result<(), ContainerError> {
        self.add_sticker_to_set(owner_id, name, item).await
    }

    async fn create_container(
        &self,
        owner_id: u64,
        name: &str,
        title: &str,
        item: &StickerItem,
    ) -> Result<(), ContainerError> {
        self.create_new_sticker_set(owner_id, name, title, item).await
    }
}

#[async_trait]
impl MediaSource for TelegramClient {
    async fn fetch(&self, file_id: &str, max_bytes: u64) -> Result<Vec<u8>, ContainerError> {
        let file = self.get_file(file_id).await?;
        if let Some(size) = file.file_size.filter(|size| *size > max_bytes) {
            return Err(ContainerError::TooLarge {
                size,
                limit: max_bytes,
            });
        }
        let path = file.file_path.ok_or_else(|| ContainerError::Rejected {
            code: 400,
            description: format!("file {file_id} has no download path"),
        })?;
        self.download(&path, max_bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123:abc";

    async fn client(server: &MockServer) -> TelegramClient {
        TelegramClient::new(server.uri(), TOKEN, Duration::from_secs(5)).unwrap()
    }

    fn ok(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": result}))
    }

    fn failure(code: u16, description: &str) -> ResponseTemplate {
        ResponseTemplate::new(code).set_body_json(json!({
            "ok": false,
            "error_code": code,
            "description": description,
        }))
    }

    fn item(payload: StickerPayload) -> StickerItem {
        StickerItem {
            payload,
            emoji: "😀".to_string(),
            is_animated: false,
        }
    }

    #[tokio::test]
    async fn test_get_sticker_set_maps_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/getStickerSet")))
            .respond_with(ok(json!({
                "name": "Collection_1_7_by_bot",
                "title": "Ada's collection vol. 1",
                "is_animated": false,
                "stickers": [
                    {"file_id": "a", "is_animated": false, "is_video": false},
                    {"file_id": "b", "is_animated": false, "is_video": false}
                ]
            })))
            .mount(&server)
            .await;

        let meta = client(&server)
            .await
            .get_container("Collection_1_7_by_bot")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.item_count, 2);
        assert!(!meta.is_animated);
        assert_eq!(meta.title, "Ada's collection vol. 1");
    }

    #[tokio::test]
    async fn test_missing_sticker_set_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/getStickerSet")))
            .respond_with(failure(400, "Bad Request: STICKERSET_INVALID"))
            .mount(&server)
            .await;

        let found = client(&server).await.get_container("nope").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_full_set_is_capacity_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/addStickerToSet")))
            .respond_with(failure(400, "Bad Request: STICKERS_TOO_MUCH"))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .append_item(7, "Collection_1_7_by_bot", &item(StickerPayload::FileId("f".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::CapacityExceeded { .. }));
    }

    #[tokio::test]
    async fn test_upload_is_attached_to_create() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/createNewStickerSet")))
            .and(body_string_contains("attach://sticker_file"))
            .and(body_string_contains("Collection_1_7_by_bot"))
            .respond_with(ok(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .await
            .create_container(
                7,
                "Collection_1_7_by_bot",
                "Collection vol. 1",
                &item(StickerPayload::Upload(b"png".to_vec())),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_forbidden_and_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/sendMessage")))
            .respond_with(failure(403, "Forbidden: bot was blocked by the user"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/sendChatAction")))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "ok": false,
                "error_code": 429,
                "description": "Too Many Requests",
                "parameters": {"retry_after": 3}
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let err = client.send_message(7, "hi", None).await.unwrap_err();
        assert!(matches!(err, ContainerError::Forbidden(_)));

        let err = client.send_chat_action(7, "typing").await.unwrap_err();
        assert!(matches!(
            err,
            ContainerError::RateLimited {
                retry_after: Some(3)
            }
        ));
    }

    #[tokio::test]
    async fn test_fetch_downloads_file() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/getFile")))
            .respond_with(ok(json!({
                "file_id": "f",
                "file_size": 4,
                "file_path": "stickers/file_1.webp"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/file/bot{TOKEN}/stickers/file_1.webp")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFF".to_vec()))
            .mount(&server)
            .await;

        let bytes = client(&server).await.fetch("f", 1024).await.unwrap();
        assert_eq!(bytes, b"RIFF");
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_before_download() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/getFile")))
            .respond_with(ok(json!({
                "file_id": "f",
                "file_size": 2048,
                "file_path": "photos/file_2.jpg"
            })))
            .mount(&server)
            .await;

        let err = client(&server).await.fetch("f", 1024).await.unwrap_err();
        assert!(matches!(
            err,
            ContainerError::TooLarge {
                size: 2048,
                limit: 1024
            }
        ));
    }

    #[tokio::test]
    async fn test_download_cap_without_content_length_hint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/file/bot{TOKEN}/big.jpg")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 4096]))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .download("big.jpg", 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::TooLarge { limit: 1024, .. }));
    }
}
