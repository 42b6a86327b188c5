//! Storage abstraction for Knowledge Hub.
//!
//! The traits here describe every persistence operation the HTTP layer and
//! the CLI need, so backends stay pluggable (SQLite in the service crate,
//! [`memory::InMemoryStore`] for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`KnowledgeBaseStore`] | Knowledge base CRUD and set-membership mutations |
//! | [`ConversationLister`] | Cursor-paginated conversation listing |
//! | [`ProjectStore`] | Schema-level project persistence |
//! | [`Directory`] | Users, conversations and files that knowledge bases reference |

pub mod memory;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::models::{
    Conversation, FileRecord, KnowledgeBase, KnowledgeBaseListing, MemberKind, NewConversation,
    NewFile, NewKnowledgeBase, NewProject, Project, User,
};
use crate::object_id::{IdRef, ObjectId};
use crate::pagination::{ConversationPage, CursorQuery};

pub const USER_MISSING: &str = "Referenced user does not exist";
pub const CONVERSATIONS_MISSING: &str = "One or more referenced conversations do not exist";
pub const FILES_MISSING: &str = "One or more referenced files do not exist";

/// Persistence for knowledge bases.
///
/// Every id argument is an [`IdRef`]; malformed raw ids fail with
/// [`StoreError::InvalidId`](crate::StoreError::InvalidId) instead of
/// resolving to `None`. Mutations return the post-update document, or
/// `None` when the knowledge base does not exist.
///
/// Reference existence is validated by [`create`](KnowledgeBaseStore::create)
/// only; updates and membership changes store whatever ids they are given.
#[async_trait]
pub trait KnowledgeBaseStore: Send + Sync {
    /// Validates references and inserts a new knowledge base.
    ///
    /// Fails with `Duplicate` when the `(user, name)` pair is taken.
    async fn create(&self, data: NewKnowledgeBase) -> StoreResult<KnowledgeBase>;

    /// Removes a knowledge base. Referenced conversations and files are untouched.
    async fn delete_by_id(&self, id: IdRef) -> StoreResult<Option<KnowledgeBase>>;

    async fn update_name(&self, id: IdRef, name: &str) -> StoreResult<Option<KnowledgeBase>>;

    async fn update_description(
        &self,
        id: IdRef,
        description: &str,
    ) -> StoreResult<Option<KnowledgeBase>>;

    /// Appends `member` to the `kind` array unless already present.
    async fn add_member(
        &self,
        kb_id: IdRef,
        kind: MemberKind,
        member: IdRef,
    ) -> StoreResult<Option<KnowledgeBase>>;

    /// Removes `member` from the `kind` array if present.
    async fn remove_member(
        &self,
        kb_id: IdRef,
        kind: MemberKind,
        member: IdRef,
    ) -> StoreResult<Option<KnowledgeBase>>;

    /// Looks up by `_id` when `id_or_slug` is a valid id, else by slug,
    /// always restricted to `user`.
    async fn find_for_user(
        &self,
        user: &ObjectId,
        id_or_slug: &str,
    ) -> StoreResult<Option<KnowledgeBase>>;

    /// The user's knowledge bases, newest first, each with up to
    /// `preview_limit` member conversations (most recently created first).
    async fn list_for_user(
        &self,
        user: &ObjectId,
        preview_limit: usize,
    ) -> StoreResult<Vec<KnowledgeBaseListing>>;

    async fn add_conversation(
        &self,
        kb_id: IdRef,
        conversation_id: IdRef,
    ) -> StoreResult<Option<KnowledgeBase>> {
        self.add_member(kb_id, MemberKind::Conversation, conversation_id)
            .await
    }

    async fn remove_conversation(
        &self,
        kb_id: IdRef,
        conversation_id: IdRef,
    ) -> StoreResult<Option<KnowledgeBase>> {
        self.remove_member(kb_id, MemberKind::Conversation, conversation_id)
            .await
    }

    async fn add_file(&self, kb_id: IdRef, file_id: IdRef) -> StoreResult<Option<KnowledgeBase>> {
        self.add_member(kb_id, MemberKind::File, file_id).await
    }

    async fn remove_file(
        &self,
        kb_id: IdRef,
        file_id: IdRef,
    ) -> StoreResult<Option<KnowledgeBase>> {
        self.remove_member(kb_id, MemberKind::File, file_id).await
    }
}

/// Cursor-paginated listing of a user's conversations.
#[async_trait]
pub trait ConversationLister: Send + Sync {
    async fn list_by_cursor(
        &self,
        user: &ObjectId,
        query: CursorQuery,
    ) -> StoreResult<ConversationPage>;
}

/// Schema-level persistence for projects. No reference validation.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn create_project(&self, data: NewProject) -> StoreResult<Project>;

    async fn get_project(&self, id: IdRef) -> StoreResult<Option<Project>>;
}

/// Records that knowledge bases point at.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn create_user(&self, email: &str, name: Option<&str>) -> StoreResult<User>;

    async fn user_exists(&self, id: &ObjectId) -> StoreResult<bool>;

    async fn create_conversation(&self, data: NewConversation) -> StoreResult<Conversation>;

    async fn create_file(&self, data: NewFile) -> StoreResult<FileRecord>;

    /// How many of `ids` name an existing record of `kind`.
    async fn count_existing(&self, kind: MemberKind, ids: &[ObjectId]) -> StoreResult<usize>;
}

/// Removes repeated ids, keeping first occurrences in order.
pub fn dedup_ids(ids: &[ObjectId]) -> Vec<ObjectId> {
    let mut seen = std::collections::HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Runs the checks a knowledge base must pass before its first write.
///
/// Returns the owning user id and the de-duplicated member lists.
pub async fn validate_new_knowledge_base<D>(
    directory: &D,
    data: &NewKnowledgeBase,
) -> StoreResult<(ObjectId, Vec<ObjectId>, Vec<ObjectId>)>
where
    D: Directory + ?Sized,
{
    let user = data
        .user
        .ok_or_else(|| StoreError::Validation("Path `user` is required.".to_string()))?;
    if data.name.is_empty() {
        return Err(StoreError::Validation("Path `name` is required.".to_string()));
    }
    if !directory.user_exists(&user).await? {
        return Err(StoreError::Validation(USER_MISSING.to_string()));
    }

    let conversation_ids = dedup_ids(&data.conversation_ids);
    if !conversation_ids.is_empty()
        && directory
            .count_existing(MemberKind::Conversation, &conversation_ids)
            .await?
            != conversation_ids.len()
    {
        return Err(StoreError::Validation(CONVERSATIONS_MISSING.to_string()));
    }

    let file_ids = dedup_ids(&data.file_ids);
    if !file_ids.is_empty()
        && directory.count_existing(MemberKind::File, &file_ids).await? != file_ids.len()
    {
        return Err(StoreError::Validation(FILES_MISSING.to_string()));
    }

    Ok((user, conversation_ids, file_ids))
}
