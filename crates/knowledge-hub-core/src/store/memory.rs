//! In-memory implementation of every store trait, for tests and embedding.
//!
//! All records live in `HashMap`s behind a single `std::sync::RwLock`.
//! The lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::models::{
    now, Conversation, FileRecord, KnowledgeBase, KnowledgeBaseListing, MemberKind,
    NewConversation, NewFile, NewKnowledgeBase, NewProject, Project, User,
    DEFAULT_CONVERSATION_TITLE,
};
use crate::object_id::{IdRef, ObjectId};
use crate::pagination::{ConversationPage, CursorQuery, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

use super::{
    dedup_ids, validate_new_knowledge_base, ConversationLister, Directory, KnowledgeBaseStore,
    ProjectStore,
};

#[derive(Default)]
struct State {
    users: HashMap<ObjectId, User>,
    conversations: HashMap<ObjectId, Conversation>,
    files: HashMap<ObjectId, FileRecord>,
    knowledge_bases: HashMap<ObjectId, KnowledgeBase>,
    projects: HashMap<ObjectId, Project>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides a conversation's `updatedAt`, for ordering tests.
    pub fn touch_conversation(&self, id: &ObjectId, updated_at: chrono::DateTime<chrono::Utc>) {
        let mut state = self.state.write().unwrap();
        if let Some(c) = state.conversations.get_mut(id) {
            c.updated_at = updated_at;
        }
    }

    fn mutate(
        &self,
        kb_id: IdRef,
        apply: impl FnOnce(&mut KnowledgeBase) -> StoreResult<()>,
    ) -> StoreResult<Option<KnowledgeBase>> {
        let id = kb_id.resolve()?;
        let mut state = self.state.write().unwrap();
        let Some(kb) = state.knowledge_bases.get(&id).cloned() else {
            return Ok(None);
        };
        let mut updated = kb;
        apply(&mut updated)?;
        updated.updated_at = now();
        state.knowledge_bases.insert(id, updated.clone());
        Ok(Some(updated))
    }

    fn name_taken(state: &State, user: &ObjectId, name: &str, except: Option<&ObjectId>) -> bool {
        state
            .knowledge_bases
            .values()
            .any(|kb| kb.user == *user && kb.name == name && Some(&kb.id) != except)
    }
}

fn members_mut(kb: &mut KnowledgeBase, kind: MemberKind) -> &mut Vec<ObjectId> {
    match kind {
        MemberKind::Conversation => &mut kb.conversation_ids,
        MemberKind::File => &mut kb.file_ids,
    }
}

#[async_trait]
impl KnowledgeBaseStore for InMemoryStore {
    async fn create(&self, data: NewKnowledgeBase) -> StoreResult<KnowledgeBase> {
        let (user, conversation_ids, file_ids) = validate_new_knowledge_base(self, &data).await?;

        let mut state = self.state.write().unwrap();
        if Self::name_taken(&state, &user, &data.name, None) {
            return Err(StoreError::Duplicate(format!(
                "user {} already has a knowledge base named {:?}",
                user, data.name
            )));
        }
        let ts = now();
        let kb = KnowledgeBase {
            id: ObjectId::new(),
            user,
            name: data.name,
            description: data.description,
            slug: data.slug,
            conversation_ids,
            file_ids,
            created_at: ts,
            updated_at: ts,
        };
        state.knowledge_bases.insert(kb.id, kb.clone());
        Ok(kb)
    }

    async fn delete_by_id(&self, id: IdRef) -> StoreResult<Option<KnowledgeBase>> {
        let id = id.resolve()?;
        Ok(self.state.write().unwrap().knowledge_bases.remove(&id))
    }

    async fn update_name(&self, id: IdRef, name: &str) -> StoreResult<Option<KnowledgeBase>> {
        let kb_id = id.resolve()?;
        {
            let state = self.state.read().unwrap();
            if let Some(kb) = state.knowledge_bases.get(&kb_id) {
                if Self::name_taken(&state, &kb.user, name, Some(&kb_id)) {
                    return Err(StoreError::Duplicate(format!(
                        "user {} already has a knowledge base named {:?}",
                        kb.user, name
                    )));
                }
            }
        }
        self.mutate(kb_id.into(), |kb| {
            kb.name = name.to_string();
            Ok(())
        })
    }

    async fn update_description(
        &self,
        id: IdRef,
        description: &str,
    ) -> StoreResult<Option<KnowledgeBase>> {
        self.mutate(id, |kb| {
            kb.description = Some(description.to_string());
            Ok(())
        })
    }

    async fn add_member(
        &self,
        kb_id: IdRef,
        kind: MemberKind,
        member: IdRef,
    ) -> StoreResult<Option<KnowledgeBase>> {
        let member = member.resolve()?;
        self.mutate(kb_id, |kb| {
            let ids = members_mut(kb, kind);
            if !ids.contains(&member) {
                ids.push(member);
            }
            Ok(())
        })
    }

    async fn remove_member(
        &self,
        kb_id: IdRef,
        kind: MemberKind,
        member: IdRef,
    ) -> StoreResult<Option<KnowledgeBase>> {
        let member = member.resolve()?;
        self.mutate(kb_id, |kb| {
            members_mut(kb, kind).retain(|id| *id != member);
            Ok(())
        })
    }

    async fn find_for_user(
        &self,
        user: &ObjectId,
        id_or_slug: &str,
    ) -> StoreResult<Option<KnowledgeBase>> {
        let state = self.state.read().unwrap();
        let found = if ObjectId::is_valid(id_or_slug) {
            let id: ObjectId = id_or_slug.parse()?;
            state
                .knowledge_bases
                .get(&id)
                .filter(|kb| kb.user == *user)
                .cloned()
        } else {
            state
                .knowledge_bases
                .values()
                .find(|kb| kb.user == *user && kb.slug.as_deref() == Some(id_or_slug))
                .cloned()
        };
        Ok(found)
    }

    async fn list_for_user(
        &self,
        user: &ObjectId,
        preview_limit: usize,
    ) -> StoreResult<Vec<KnowledgeBaseListing>> {
        let state = self.state.read().unwrap();
        let mut kbs: Vec<&KnowledgeBase> = state
            .knowledge_bases
            .values()
            .filter(|kb| kb.user == *user)
            .collect();
        kbs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(kbs
            .into_iter()
            .map(|kb| {
                let mut members: Vec<&Conversation> = kb
                    .conversation_ids
                    .iter()
                    .filter_map(|id| state.conversations.get(id))
                    .collect();
                members.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
                KnowledgeBaseListing {
                    knowledge_base: kb.clone(),
                    conversations: members
                        .into_iter()
                        .take(preview_limit)
                        .map(Conversation::preview)
                        .collect(),
                }
            })
            .collect())
    }
}

#[async_trait]
impl ConversationLister for InMemoryStore {
    async fn list_by_cursor(
        &self,
        user: &ObjectId,
        query: CursorQuery,
    ) -> StoreResult<ConversationPage> {
        let cursor = query.decoded_cursor()?;
        let limit = query.effective_limit(DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT);

        let state = self.state.read().unwrap();
        let mut rows: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.user == *user)
            .filter(|c| match &query.conversation_ids {
                Some(ids) => ids.contains(&c.id),
                None => true,
            })
            .filter(|c| cursor.map_or(true, |cur| cur.precedes(c)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit as usize + 1);

        Ok(ConversationPage::from_rows(rows, limit))
    }
}

#[async_trait]
impl ProjectStore for InMemoryStore {
    async fn create_project(&self, data: NewProject) -> StoreResult<Project> {
        let ts = now();
        let project = Project {
            id: ObjectId::new(),
            name: data.name,
            prompt_group_ids: data.prompt_group_ids,
            agent_ids: data.agent_ids,
            conversation_ids: data.conversation_ids,
            file_ids: data.file_ids,
            created_at: ts,
            updated_at: ts,
        };
        self.state
            .write()
            .unwrap()
            .projects
            .insert(project.id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: IdRef) -> StoreResult<Option<Project>> {
        let id = id.resolve()?;
        Ok(self.state.read().unwrap().projects.get(&id).cloned())
    }
}

#[async_trait]
impl Directory for InMemoryStore {
    async fn create_user(&self, email: &str, name: Option<&str>) -> StoreResult<User> {
        let mut state = self.state.write().unwrap();
        if state.users.values().any(|u| u.email == email) {
            return Err(StoreError::Duplicate(format!("email {email} already registered")));
        }
        let user = User {
            id: ObjectId::new(),
            email: email.to_string(),
            name: name.map(str::to_string),
            created_at: now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user_exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.state.read().unwrap().users.contains_key(id))
    }

    async fn create_conversation(&self, data: NewConversation) -> StoreResult<Conversation> {
        let ts = now();
        let conversation = Conversation {
            id: ObjectId::new(),
            conversation_id: uuid::Uuid::new_v4().to_string(),
            user: data.user,
            title: data
                .title
                .unwrap_or_else(|| DEFAULT_CONVERSATION_TITLE.to_string()),
            created_at: ts,
            updated_at: ts,
        };
        self.state
            .write()
            .unwrap()
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn create_file(&self, data: NewFile) -> StoreResult<FileRecord> {
        let ts = now();
        let file = FileRecord {
            id: ObjectId::new(),
            file_id: uuid::Uuid::new_v4().to_string(),
            user: data.user,
            filename: data.filename,
            bytes: data.bytes,
            created_at: ts,
            updated_at: ts,
        };
        self.state
            .write()
            .unwrap()
            .files
            .insert(file.id, file.clone());
        Ok(file)
    }

    async fn count_existing(&self, kind: MemberKind, ids: &[ObjectId]) -> StoreResult<usize> {
        let state = self.state.read().unwrap();
        let ids = dedup_ids(ids);
        Ok(ids
            .iter()
            .filter(|id| match kind {
                MemberKind::Conversation => state.conversations.contains_key(id),
                MemberKind::File => state.files.contains_key(id),
            })
            .count())
    }
}
