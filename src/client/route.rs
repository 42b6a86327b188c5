//! Collection route model and client-side paths.
//!
//! A collection route shows the chat view for a knowledge base or project,
//! with a file drop zone and the list of past conversations underneath.

use knowledge_hub_core::models::Conversation;

use super::{ClientError, KnowledgeHubClient};

/// Page size for the past-conversation list.
pub const PAGE_SIZE: i64 = 25;

pub const NO_CHATS_YET: &str = "No chats yet";
pub const DROP_HINT: &str = "Drag and drop files here";
pub const PAST_CHATS: &str = "Past chats";

fn encode(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

/// `/knowledge-bases/{id}/c`
pub fn knowledge_base_path(display_id: &str) -> String {
    format!("/knowledge-bases/{}/c", encode(display_id))
}

/// `/knowledge-bases/{id}/c/new`
pub fn new_chat_path(display_id: &str) -> String {
    format!("/knowledge-bases/{}/c/new", encode(display_id))
}

/// `/knowledge-bases/{id}/c/{conversationId}`
pub fn conversation_path(display_id: &str, conversation_id: &str) -> String {
    format!(
        "/knowledge-bases/{}/c/{}",
        encode(display_id),
        encode(conversation_id)
    )
}

/// `/projects/{id}/c`
pub fn project_path(project_id: &str) -> String {
    format!("/projects/{}/c", encode(project_id))
}

/// `/projects/{id}/c/{conversationId}`
pub fn project_conversation_path(project_id: &str, conversation_id: &str) -> String {
    format!(
        "/projects/{}/c/{}",
        encode(project_id),
        encode(conversation_id)
    )
}

/// What a collection route is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Knowledge base, by id or slug.
    KnowledgeBase(String),
    Project(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Loading,
    Success,
    Error(String),
}

#[derive(Debug, Default)]
pub struct DropZone {
    files: Vec<String>,
}

impl DropZone {
    pub fn drop_files<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(names.into_iter().map(Into::into));
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Shown while nothing has been dropped.
    pub fn hint(&self) -> Option<&'static str> {
        self.files.is_empty().then_some(DROP_HINT)
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}

pub struct CollectionView {
    scope: Scope,
    pub drop_zone: DropZone,
    conversations: Vec<Conversation>,
    next_cursor: Option<String>,
    state: RequestState,
}

impl CollectionView {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            drop_zone: DropZone::default(),
            conversations: Vec::new(),
            next_cursor: None,
            state: RequestState::Idle,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn state(&self) -> &RequestState {
        &self.state
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }

    /// Placeholder text when there is nothing to list.
    pub fn placeholder(&self) -> Option<&'static str> {
        (self.conversations.is_empty() && self.state != RequestState::Loading)
            .then_some(NO_CHATS_YET)
    }

    /// Heading over the past-conversation list, once it has entries.
    pub fn list_heading(&self) -> Option<&'static str> {
        (!self.conversations.is_empty()).then_some(PAST_CHATS)
    }

    /// Where each listed conversation links to, for knowledge base scope.
    pub fn conversation_links(&self) -> Vec<(String, String)> {
        match &self.scope {
            Scope::KnowledgeBase(id) => self
                .conversations
                .iter()
                .map(|c| (c.title.clone(), conversation_path(id, &c.conversation_id)))
                .collect(),
            Scope::Project(_) => Vec::new(),
        }
    }

    /// Loads the first page, discarding anything already listed.
    pub async fn load(&mut self, client: &KnowledgeHubClient) -> Result<(), ClientError> {
        self.conversations.clear();
        self.next_cursor = None;
        self.fetch(client, None).await
    }

    /// Appends the next page; a no-op once the last page was loaded.
    pub async fn load_more(&mut self, client: &KnowledgeHubClient) -> Result<(), ClientError> {
        match self.next_cursor.take() {
            Some(cursor) => self.fetch(client, Some(cursor)).await,
            None => Ok(()),
        }
    }

    async fn fetch(
        &mut self,
        client: &KnowledgeHubClient,
        cursor: Option<String>,
    ) -> Result<(), ClientError> {
        let id = match &self.scope {
            Scope::KnowledgeBase(id) => id.clone(),
            // projects have no remote conversation listing
            Scope::Project(_) => {
                self.state = RequestState::Success;
                return Ok(());
            }
        };

        self.state = RequestState::Loading;
        match client
            .conversations(&id, cursor.as_deref(), Some(PAGE_SIZE))
            .await
        {
            Ok(page) => {
                self.conversations.extend(page.conversations);
                self.next_cursor = page.next_cursor;
                self.state = RequestState::Success;
                Ok(())
            }
            Err(e) => {
                self.next_cursor = cursor;
                self.state = RequestState::Error(e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_encode_ids() {
        assert_eq!(knowledge_base_path("team notes"), "/knowledge-bases/team%20notes/c");
        assert_eq!(new_chat_path("abc"), "/knowledge-bases/abc/c/new");
        assert_eq!(conversation_path("abc", "c-1"), "/knowledge-bases/abc/c/c-1");
        assert_eq!(project_path("p 1"), "/projects/p%201/c");
        assert_eq!(project_conversation_path("p1", "c-1"), "/projects/p1/c/c-1");
    }

    #[test]
    fn test_drop_zone_hint() {
        let mut zone = DropZone::default();
        assert_eq!(zone.hint(), Some(DROP_HINT));
        zone.drop_files(["a.pdf", "b.txt"]);
        assert_eq!(zone.hint(), None);
        assert_eq!(zone.files(), ["a.pdf", "b.txt"]);
    }

    #[tokio::test]
    async fn test_project_scope_shows_placeholder() {
        // never contacted
        let client = KnowledgeHubClient::new("http://127.0.0.1:9", "t");
        let mut view = CollectionView::new(Scope::Project("p".into()));
        view.load(&client).await.unwrap();
        assert_eq!(view.state(), &RequestState::Success);
        assert_eq!(view.placeholder(), Some(NO_CHATS_YET));
        assert_eq!(view.list_heading(), None);
        assert!(view.conversation_links().is_empty());
    }
}
