//! Core data models used throughout Knowledge Hub.
//!
//! JSON field names follow the document shapes served over HTTP: `_id` for
//! the primary id and camelCase for everything else. Optional text fields
//! are omitted rather than serialized as `null`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::object_id::ObjectId;

/// Current time truncated to millisecond precision, the precision stores keep.
pub fn now() -> DateTime<Utc> {
    let millis = Utc::now().timestamp_millis();
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

/// A named, user-owned collection of conversation and file references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBase {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user: ObjectId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default)]
    pub conversation_ids: Vec<ObjectId>,
    #[serde(default)]
    pub file_ids: Vec<ObjectId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeBase {
    /// The key used in client routes: the slug when set, else the id.
    pub fn display_id(&self) -> String {
        match self.slug.as_deref() {
            Some(slug) if !slug.is_empty() => slug.to_string(),
            _ => self.id.to_string(),
        }
    }

    pub fn members(&self, kind: MemberKind) -> &[ObjectId] {
        match kind {
            MemberKind::Conversation => &self.conversation_ids,
            MemberKind::File => &self.file_ids,
        }
    }
}

/// Input for creating a knowledge base.
#[derive(Debug, Clone, Default)]
pub struct NewKnowledgeBase {
    pub user: Option<ObjectId>,
    pub name: String,
    pub description: Option<String>,
    pub slug: Option<String>,
    pub conversation_ids: Vec<ObjectId>,
    pub file_ids: Vec<ObjectId>,
}

impl NewKnowledgeBase {
    pub fn new(user: ObjectId, name: impl Into<String>) -> Self {
        Self {
            user: Some(user),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn conversations(mut self, ids: Vec<ObjectId>) -> Self {
        self.conversation_ids = ids;
        self
    }

    pub fn files(mut self, ids: Vec<ObjectId>) -> Self {
        self.file_ids = ids;
        self
    }
}

/// Which membership array of a knowledge base an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Conversation,
    File,
}

impl MemberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberKind::Conversation => "conversation",
            MemberKind::File => "file",
        }
    }
}

/// The populated conversation fields shown inline in knowledge base listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPreview {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub conversation_id: String,
    pub title: String,
}

/// A knowledge base plus its bounded conversation preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseListing {
    #[serde(flatten)]
    pub knowledge_base: KnowledgeBase,
    #[serde(default)]
    pub conversations: Vec<ConversationPreview>,
}

/// A user-agnostic grouping of prompt groups, agents, conversations and files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub prompt_group_ids: Vec<ObjectId>,
    /// Agent ids are plain strings, not object ids.
    #[serde(default)]
    pub agent_ids: Vec<String>,
    #[serde(default)]
    pub conversation_ids: Vec<ObjectId>,
    #[serde(default)]
    pub file_ids: Vec<ObjectId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub prompt_group_ids: Vec<ObjectId>,
    pub agent_ids: Vec<String>,
    pub conversation_ids: Vec<ObjectId>,
    pub file_ids: Vec<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Chat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub conversation_id: String,
    pub user: ObjectId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn preview(&self) -> ConversationPreview {
        ConversationPreview {
            id: self.id,
            conversation_id: self.conversation_id.clone(),
            title: self.title.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub user: ObjectId,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub file_id: String,
    pub user: ObjectId,
    pub filename: String,
    pub bytes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub user: ObjectId,
    pub filename: String,
    pub bytes: i64,
}
