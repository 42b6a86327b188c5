//! Typed HTTP client and headless UI state for the knowledge base API.
//!
//! [`KnowledgeHubClient`] wraps every `/api/knowledge-bases` route. The
//! submodules hold the client-side models that sit on top of it:
//!
//! - [`state`]: the session's reactive knowledge base list, its local-only
//!   project list and the navigation panel rendered from both.
//! - [`dialog`]: the "new knowledge base" dialog.
//! - [`route`]: the collection route (file drop zone plus paginated
//!   past conversations) and the client-side path helpers.

pub mod dialog;
pub mod route;
pub mod state;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use knowledge_hub_core::models::{KnowledgeBase, KnowledgeBaseListing};
use knowledge_hub_core::pagination::ConversationPage;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{message} ({status} {code})")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Body of `POST /api/knowledge-bases`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateKnowledgeBase {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

/// Body of `PATCH /api/knowledge-bases/{id}`. Absent fields are left alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateKnowledgeBase {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MembershipBody<'a> {
    conversation_id: &'a str,
}

/// Bearer-authenticated client for one user session.
#[derive(Clone)]
pub struct KnowledgeHubClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl KnowledgeHubClient {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:3080`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), base_url, token)
    }

    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/knowledge-bases{}", self.base_url, path)
    }

    fn member_url(&self, id_or_slug: &str, rest: &str) -> String {
        self.url(&format!("/{}{}", urlencoding::encode(id_or_slug), rest))
    }

    /// `GET /health`; returns the server version.
    pub async fn health(&self) -> Result<String, ClientError> {
        #[derive(Deserialize)]
        struct Health {
            version: String,
        }

        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        let health: Health = decode(resp).await?;
        Ok(health.version)
    }

    pub async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBaseListing>, ClientError> {
        let resp = self
            .http
            .get(self.url(""))
            .bearer_auth(&self.token)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn create_knowledge_base(
        &self,
        body: &CreateKnowledgeBase,
    ) -> Result<KnowledgeBase, ClientError> {
        let resp = self
            .http
            .post(self.url(""))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn update_knowledge_base(
        &self,
        id: &str,
        body: &UpdateKnowledgeBase,
    ) -> Result<Option<KnowledgeBase>, ClientError> {
        let resp = self
            .http
            .patch(self.member_url(id, ""))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn delete_knowledge_base(
        &self,
        id: &str,
    ) -> Result<Option<KnowledgeBase>, ClientError> {
        let resp = self
            .http
            .delete(self.member_url(id, ""))
            .bearer_auth(&self.token)
            .send()
            .await?;
        decode(resp).await
    }

    /// One page of a knowledge base's conversations.
    pub async fn conversations(
        &self,
        id_or_slug: &str,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> Result<ConversationPage, ClientError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let resp = self
            .http
            .get(self.member_url(id_or_slug, "/conversations"))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn add_conversation(
        &self,
        id_or_slug: &str,
        conversation_id: &str,
    ) -> Result<Option<KnowledgeBase>, ClientError> {
        self.membership(id_or_slug, "/addConversation", conversation_id)
            .await
    }

    pub async fn remove_conversation(
        &self,
        id_or_slug: &str,
        conversation_id: &str,
    ) -> Result<Option<KnowledgeBase>, ClientError> {
        self.membership(id_or_slug, "/removeConversation", conversation_id)
            .await
    }

    async fn membership(
        &self,
        id_or_slug: &str,
        action: &str,
        conversation_id: &str,
    ) -> Result<Option<KnowledgeBase>, ClientError> {
        let resp = self
            .http
            .post(self.member_url(id_or_slug, action))
            .bearer_auth(&self.token)
            .json(&MembershipBody { conversation_id })
            .send()
            .await?;
        decode(resp).await
    }
}

/// Decodes a success body, or turns an error response into [`ClientError::Api`].
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    Err(api_error(status, &text))
}

fn api_error(status: StatusCode, text: &str) -> ClientError {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => ClientError::Api {
            status: status.as_u16(),
            code: body.error.code,
            message: body.error.message,
        },
        Err(_) => ClientError::Api {
            status: status.as_u16(),
            code: "unknown".to_string(),
            message: if text.is_empty() {
                status.to_string()
            } else {
                text.to_string()
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_from_json_body() {
        let err = api_error(
            StatusCode::CONFLICT,
            r#"{"error":{"code":"conflict","message":"Name already exists"}}"#,
        );
        match err {
            ClientError::Api {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 409);
                assert_eq!(code, "conflict");
                assert_eq!(message, "Name already exists");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_api_error_from_plain_body() {
        let err = api_error(StatusCode::UNPROCESSABLE_ENTITY, "bad json");
        assert_eq!(err.status(), Some(422));
        assert!(err.to_string().contains("bad json"));
    }

    #[test]
    fn test_member_urls_are_encoded() {
        let client = KnowledgeHubClient::new("http://localhost:3080/", "t");
        assert_eq!(
            client.member_url("my notes", "/conversations"),
            "http://localhost:3080/api/knowledge-bases/my%20notes/conversations"
        );
        assert_eq!(client.url(""), "http://localhost:3080/api/knowledge-bases");
    }
}
