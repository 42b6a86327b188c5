//! Cursor pagination over conversations.
//!
//! Conversations are ordered by `updatedAt` descending, then `_id`
//! descending. A cursor marks the last row of the previous page and is
//! opaque to clients: URL-safe base64 (no padding) of
//! `"<updatedAt millis>:<_id hex>"`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::Conversation;
use crate::object_id::ObjectId;

pub const DEFAULT_PAGE_LIMIT: i64 = 25;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Position after which the next page starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub updated_at_ms: i64,
    pub id: ObjectId,
}

impl Cursor {
    pub fn after(conversation: &Conversation) -> Self {
        Self {
            updated_at_ms: conversation.updated_at.timestamp_millis(),
            id: conversation.id,
        }
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.updated_at_ms, self.id))
    }

    pub fn decode(token: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidCursor(token.to_string());

        let raw = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        let raw = String::from_utf8(raw).map_err(|_| invalid())?;
        let (millis, id) = raw.split_once(':').ok_or_else(invalid)?;

        Ok(Self {
            updated_at_ms: millis.parse().map_err(|_| invalid())?,
            id: id.parse().map_err(|_| invalid())?,
        })
    }

    /// True when `conversation` sorts strictly after this cursor.
    pub fn precedes(&self, conversation: &Conversation) -> bool {
        let ts = conversation.updated_at.timestamp_millis();
        ts < self.updated_at_ms || (ts == self.updated_at_ms && conversation.id < self.id)
    }
}

/// Arguments for [`ConversationLister::list_by_cursor`](crate::store::ConversationLister::list_by_cursor).
#[derive(Debug, Clone, Default)]
pub struct CursorQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    /// Restricts results to these `_id`s when set.
    pub conversation_ids: Option<Vec<ObjectId>>,
}

impl CursorQuery {
    pub fn decoded_cursor(&self) -> Result<Option<Cursor>, StoreError> {
        match self.cursor.as_deref() {
            None | Some("") => Ok(None),
            Some(token) => Cursor::decode(token).map(Some),
        }
    }

    /// Requested limit clamped into `[1, max]`, `default` when absent.
    pub fn effective_limit(&self, default: i64, max: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, max.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl ConversationPage {
    /// Builds a page from up to `limit + 1` ordered rows.
    pub fn from_rows(mut rows: Vec<Conversation>, limit: i64) -> Self {
        let limit = limit.max(0) as usize;
        let next_cursor = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(|c| Cursor::after(c).encode())
        } else {
            None
        };
        Self {
            conversations: rows,
            next_cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now;

    fn conversation(ms: i64) -> Conversation {
        let ts = chrono::DateTime::from_timestamp_millis(ms).unwrap();
        Conversation {
            id: ObjectId::new(),
            conversation_id: uuid::Uuid::new_v4().to_string(),
            user: ObjectId::new(),
            title: "t".to_string(),
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_cursor_roundtrip() {
        let c = Cursor {
            updated_at_ms: 1_700_000_000_123,
            id: ObjectId::new(),
        };
        let token = c.encode();
        assert!(!token.contains('='));
        assert_eq!(Cursor::decode(&token).unwrap(), c);
    }

    #[test]
    fn test_garbage_cursor_rejected() {
        for bad in ["!!!", "bm90LWEtY3Vyc29y", "MTIzOm5vdC1hbi1pZA"] {
            assert!(matches!(
                Cursor::decode(bad),
                Err(StoreError::InvalidCursor(_))
            ));
        }
    }

    #[test]
    fn test_effective_limit() {
        let q = CursorQuery::default();
        assert_eq!(q.effective_limit(25, 100), 25);
        let q = CursorQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(q.effective_limit(25, 100), 1);
        let q = CursorQuery {
            limit: Some(1000),
            ..Default::default()
        };
        assert_eq!(q.effective_limit(25, 100), 100);
    }

    #[test]
    fn test_empty_cursor_means_first_page() {
        let q = CursorQuery {
            cursor: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(q.decoded_cursor().unwrap(), None);
    }

    #[test]
    fn test_page_from_rows_sets_next_cursor_only_when_more() {
        let base = now().timestamp_millis();
        let rows: Vec<_> = (0..3).map(|i| conversation(base - i)).collect();

        let page = ConversationPage::from_rows(rows.clone(), 5);
        assert_eq!(page.conversations.len(), 3);
        assert!(page.next_cursor.is_none());

        let page = ConversationPage::from_rows(rows.clone(), 2);
        assert_eq!(page.conversations.len(), 2);
        let cursor = Cursor::decode(page.next_cursor.as_deref().unwrap()).unwrap();
        assert_eq!(cursor.id, rows[1].id);
        assert!(cursor.precedes(&rows[2]));
        assert!(!cursor.precedes(&rows[0]));
    }
}
