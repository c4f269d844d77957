//! Typed wrapper over the Courier REST surface.
//!
//! Every call carries the bearer token; error bodies of the shape
//! `{"error": "..."}` are surfaced as [`ClientError::Api`].

use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use courier_shared::{Group, GroupId, Message, User, UserId};

use crate::error::ClientError;

/// Result of a seen-marking call: which messages actually transitioned.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeenReceipt {
    pub updated_count: usize,
    pub message_ids: Vec<courier_shared::MessageId>,
}

#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CreateGroupBody<'a> {
    name: &'a str,
    members: &'a [UserId],
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct CourierApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl CourierApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// The WebSocket endpoint matching this API instance, token included.
    pub fn websocket_url(&self) -> String {
        let ws_base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{ws_base}/ws?token={}", self.token)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        debug!(status = status.as_u16(), message = %message, "API call failed");
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn contacts(&self) -> Result<Vec<User>, ClientError> {
        let resp = self.request(Method::GET, "/messages/contacts").send().await?;
        self.parse(resp).await
    }

    /// Users the caller has an existing direct conversation with.
    pub async fn chat_partners(&self) -> Result<Vec<User>, ClientError> {
        let resp = self.request(Method::GET, "/messages/chats").send().await?;
        self.parse(resp).await
    }

    pub async fn direct_messages(&self, other: UserId) -> Result<Vec<Message>, ClientError> {
        let resp = self
            .request(Method::GET, &format!("/messages/{other}"))
            .send()
            .await?;
        self.parse(resp).await
    }

    pub async fn send_direct_message(
        &self,
        to: UserId,
        text: Option<&str>,
        image: Option<&str>,
    ) -> Result<Message, ClientError> {
        let resp = self
            .request(Method::POST, &format!("/messages/send/{to}"))
            .json(&SendMessageBody { text, image })
            .send()
            .await?;
        self.parse(resp).await
    }

    pub async fn mark_direct_seen(&self, other: UserId) -> Result<SeenReceipt, ClientError> {
        let resp = self
            .request(Method::PUT, &format!("/messages/seen/{other}"))
            .send()
            .await?;
        self.parse(resp).await
    }

    pub async fn create_group(
        &self,
        name: &str,
        members: &[UserId],
        avatar: Option<&str>,
    ) -> Result<Group, ClientError> {
        let resp = self
            .request(Method::POST, "/groups")
            .json(&CreateGroupBody {
                name,
                members,
                avatar,
            })
            .send()
            .await?;
        self.parse(resp).await
    }

    pub async fn my_groups(&self) -> Result<Vec<Group>, ClientError> {
        let resp = self.request(Method::GET, "/groups/mine").send().await?;
        self.parse(resp).await
    }

    pub async fn group_messages(&self, group: GroupId) -> Result<Vec<Message>, ClientError> {
        let resp = self
            .request(Method::GET, &format!("/groups/{group}/messages"))
            .send()
            .await?;
        self.parse(resp).await
    }

    pub async fn send_group_message(
        &self,
        group: GroupId,
        text: Option<&str>,
        image: Option<&str>,
    ) -> Result<Message, ClientError> {
        let resp = self
            .request(Method::POST, &format!("/groups/{group}/messages"))
            .json(&SendMessageBody { text, image })
            .send()
            .await?;
        self.parse(resp).await
    }

    pub async fn mark_group_seen(&self, group: GroupId) -> Result<SeenReceipt, ClientError> {
        let resp = self
            .request(Method::PUT, &format!("/groups/{group}/seen"))
            .send()
            .await?;
        self.parse(resp).await
    }
}
