//! SQLite-backed implementation of the core store traits.
//!
//! Maps every [`KnowledgeBaseStore`], [`ConversationLister`],
//! [`ProjectStore`] and [`Directory`] operation onto the schema created by
//! [`migrate`](crate::migrate). Ids are stored as 24-character hex text and
//! timestamps as unix milliseconds.
//!
//! Knowledge base repository failures are logged at `error` level and then
//! returned to the caller unchanged.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

use knowledge_hub_core::models::{
    now, Conversation, ConversationPreview, FileRecord, KnowledgeBase, KnowledgeBaseListing,
    MemberKind, NewConversation, NewFile, NewKnowledgeBase, NewProject, Project, User,
    DEFAULT_CONVERSATION_TITLE,
};
use knowledge_hub_core::pagination::{
    ConversationPage, CursorQuery, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
use knowledge_hub_core::store::{
    dedup_ids, validate_new_knowledge_base, ConversationLister, Directory, KnowledgeBaseStore,
    ProjectStore,
};
use knowledge_hub_core::{IdRef, ObjectId, StoreError, StoreResult};

const PROJECT_PROMPT_GROUP: &str = "promptGroup";
const PROJECT_AGENT: &str = "agent";

/// SQLite implementation of the store traits.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    default_page_limit: i64,
    max_page_limit: i64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            default_page_limit: DEFAULT_PAGE_LIMIT,
            max_page_limit: MAX_PAGE_LIMIT,
        }
    }

    /// Overrides the conversation page size defaults.
    pub fn with_page_limits(mut self, default_limit: i64, max_limit: i64) -> Self {
        self.default_page_limit = default_limit;
        self.max_page_limit = max_limit;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn try_update_name(&self, id: IdRef, name: &str) -> StoreResult<Option<KnowledgeBase>> {
        let id = id.resolve()?;
        let result =
            sqlx::query("UPDATE knowledge_bases SET name = ?, updated_at = ? WHERE id = ?")
                .bind(name)
                .bind(now().timestamp_millis())
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.load(&id).await
    }

    async fn try_update_description(
        &self,
        id: IdRef,
        description: &str,
    ) -> StoreResult<Option<KnowledgeBase>> {
        let id = id.resolve()?;
        let result =
            sqlx::query("UPDATE knowledge_bases SET description = ?, updated_at = ? WHERE id = ?")
                .bind(description)
                .bind(now().timestamp_millis())
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.load(&id).await
    }

    async fn try_create(&self, data: NewKnowledgeBase) -> StoreResult<KnowledgeBase> {
        let (user, conversation_ids, file_ids) = validate_new_knowledge_base(self, &data).await?;
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

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            r#"
            INSERT INTO knowledge_bases (id, user_id, name, description, slug, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(kb.id.to_string())
        .bind(kb.user.to_string())
        .bind(&kb.name)
        .bind(&kb.description)
        .bind(&kb.slug)
        .bind(ts.timestamp_millis())
        .bind(ts.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for kind in [MemberKind::Conversation, MemberKind::File] {
            for member in kb.members(kind) {
                sqlx::query(
                    "INSERT INTO knowledge_base_members (knowledge_base_id, kind, member_id) VALUES (?, ?, ?)",
                )
                .bind(kb.id.to_string())
                .bind(kind.as_str())
                .bind(member.to_string())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(kb)
    }

    async fn try_delete(&self, id: IdRef) -> StoreResult<Option<KnowledgeBase>> {
        let id = id.resolve()?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if !lock_knowledge_base(&mut *tx, &id, None).await? {
            return Ok(None);
        }
        let Some(kb) = load_knowledge_base(&mut *tx, &id).await? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM knowledge_bases WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(Some(kb))
    }

    async fn try_mutate_member(
        &self,
        kb_id: IdRef,
        kind: MemberKind,
        member: IdRef,
        insert: bool,
    ) -> StoreResult<Option<KnowledgeBase>> {
        let kb_id = kb_id.resolve()?;
        let member = member.resolve()?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if !lock_knowledge_base(&mut *tx, &kb_id, Some(now().timestamp_millis())).await? {
            return Ok(None);
        }

        let statement = if insert {
            "INSERT OR IGNORE INTO knowledge_base_members (knowledge_base_id, kind, member_id) VALUES (?, ?, ?)"
        } else {
            "DELETE FROM knowledge_base_members WHERE knowledge_base_id = ? AND kind = ? AND member_id = ?"
        };
        sqlx::query(statement)
            .bind(kb_id.to_string())
            .bind(kind.as_str())
            .bind(member.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let kb = load_knowledge_base(&mut *tx, &kb_id).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(kb)
    }

    async fn load(&self, id: &ObjectId) -> StoreResult<Option<KnowledgeBase>> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        load_knowledge_base(&mut *conn, id).await
    }

    async fn preview(
        &self,
        kb_id: &ObjectId,
        limit: usize,
    ) -> StoreResult<Vec<ConversationPreview>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.conversation_id, c.title
            FROM knowledge_base_members m
            JOIN conversations c ON c.id = m.member_id
            WHERE m.knowledge_base_id = ? AND m.kind = 'conversation'
            ORDER BY c.created_at DESC, c.id DESC
            LIMIT ?
            "#,
        )
        .bind(kb_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok(ConversationPreview {
                    id: parse_id(row.get("id"))?,
                    conversation_id: row.get("conversation_id"),
                    title: row.get("title"),
                })
            })
            .collect()
    }
}

/// Translates driver errors, surfacing unique-index violations as `Duplicate`.
fn db_err(err: sqlx::Error) -> StoreError {
    if let Some(db) = err.as_database_error() {
        if db.is_unique_violation() {
            return StoreError::Duplicate(db.message().to_string());
        }
    }
    StoreError::backend(err)
}

fn parse_id(raw: String) -> StoreResult<ObjectId> {
    raw.parse()
        .map_err(|_| StoreError::backend(anyhow!("malformed id stored in database: {}", raw)))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn logged<T>(operation: &str, result: StoreResult<T>) -> StoreResult<T> {
    result.inspect_err(|e| tracing::error!(error = %e, "Error {}", operation))
}

/// Takes the write lock by touching the row before anything is read.
///
/// A deferred transaction that reads first cannot be upgraded to a writer
/// while another connection writes; SQLite fails it with `SQLITE_BUSY`
/// instead of waiting. Writing first lets the busy timeout apply.
/// `updated_at` is set when given, otherwise left as is. Returns whether
/// the row exists.
async fn lock_knowledge_base(
    conn: &mut SqliteConnection,
    id: &ObjectId,
    updated_at: Option<i64>,
) -> StoreResult<bool> {
    let result = sqlx::query(
        "UPDATE knowledge_bases SET updated_at = COALESCE(?, updated_at) WHERE id = ?",
    )
    .bind(updated_at)
    .bind(id.to_string())
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(result.rows_affected() > 0)
}

async fn load_knowledge_base(
    conn: &mut SqliteConnection,
    id: &ObjectId,
) -> StoreResult<Option<KnowledgeBase>> {
    let row = sqlx::query(
        "SELECT id, user_id, name, description, slug, created_at, updated_at FROM knowledge_bases WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;

    let Some(row) = row else {
        return Ok(None);
    };

    let members = sqlx::query(
        "SELECT kind, member_id FROM knowledge_base_members WHERE knowledge_base_id = ? ORDER BY seq ASC",
    )
    .bind(id.to_string())
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;

    let mut conversation_ids = Vec::new();
    let mut file_ids = Vec::new();
    for member in &members {
        let kind: String = member.get("kind");
        let member_id = parse_id(member.get("member_id"))?;
        match kind.as_str() {
            "conversation" => conversation_ids.push(member_id),
            "file" => file_ids.push(member_id),
            other => {
                return Err(StoreError::backend(anyhow!(
                    "unknown knowledge base member kind: {}",
                    other
                )))
            }
        }
    }

    Ok(Some(KnowledgeBase {
        id: parse_id(row.get("id"))?,
        user: parse_id(row.get("user_id"))?,
        name: row.get("name"),
        description: row.get("description"),
        slug: row.get("slug"),
        conversation_ids,
        file_ids,
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    }))
}

fn conversation_from_row(row: &SqliteRow) -> StoreResult<Conversation> {
    Ok(Conversation {
        id: parse_id(row.get("id"))?,
        conversation_id: row.get("conversation_id"),
        user: parse_id(row.get("user_id"))?,
        title: row.get("title"),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    })
}

#[async_trait]
impl KnowledgeBaseStore for SqliteStore {
    async fn create(&self, data: NewKnowledgeBase) -> StoreResult<KnowledgeBase> {
        logged("creating knowledge base", self.try_create(data).await)
    }

    async fn delete_by_id(&self, id: IdRef) -> StoreResult<Option<KnowledgeBase>> {
        logged("deleting knowledge base", self.try_delete(id).await)
    }

    async fn update_name(&self, id: IdRef, name: &str) -> StoreResult<Option<KnowledgeBase>> {
        logged(
            "updating knowledge base name",
            self.try_update_name(id, name).await,
        )
    }

    async fn update_description(
        &self,
        id: IdRef,
        description: &str,
    ) -> StoreResult<Option<KnowledgeBase>> {
        logged(
            "updating knowledge base description",
            self.try_update_description(id, description).await,
        )
    }

    async fn add_member(
        &self,
        kb_id: IdRef,
        kind: MemberKind,
        member: IdRef,
    ) -> StoreResult<Option<KnowledgeBase>> {
        let operation = format!("adding {} to knowledge base", kind.as_str());
        logged(
            &operation,
            self.try_mutate_member(kb_id, kind, member, true).await,
        )
    }

    async fn remove_member(
        &self,
        kb_id: IdRef,
        kind: MemberKind,
        member: IdRef,
    ) -> StoreResult<Option<KnowledgeBase>> {
        let operation = format!("removing {} from knowledge base", kind.as_str());
        logged(
            &operation,
            self.try_mutate_member(kb_id, kind, member, false).await,
        )
    }

    async fn find_for_user(
        &self,
        user: &ObjectId,
        id_or_slug: &str,
    ) -> StoreResult<Option<KnowledgeBase>> {
        let (sql, key) = if ObjectId::is_valid(id_or_slug) {
            let id: ObjectId = id_or_slug.parse()?;
            (
                "SELECT id FROM knowledge_bases WHERE id = ? AND user_id = ? LIMIT 1",
                id.to_string(),
            )
        } else {
            (
                "SELECT id FROM knowledge_bases WHERE slug = ? AND user_id = ? ORDER BY created_at ASC, id ASC LIMIT 1",
                id_or_slug.to_string(),
            )
        };
        let found: Option<String> = sqlx::query_scalar(sql)
            .bind(key)
            .bind(user.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match found {
            Some(id) => self.load(&parse_id(id)?).await,
            None => Ok(None),
        }
    }

    async fn list_for_user(
        &self,
        user: &ObjectId,
        preview_limit: usize,
    ) -> StoreResult<Vec<KnowledgeBaseListing>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM knowledge_bases WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut listings = Vec::with_capacity(ids.len());
        for id in ids {
            let id = parse_id(id)?;
            // Deleted between the two queries.
            let Some(knowledge_base) = self.load(&id).await? else {
                continue;
            };
            let conversations = self.preview(&id, preview_limit).await?;
            listings.push(KnowledgeBaseListing {
                knowledge_base,
                conversations,
            });
        }
        Ok(listings)
    }
}

#[async_trait]
impl ConversationLister for SqliteStore {
    async fn list_by_cursor(
        &self,
        user: &ObjectId,
        query: CursorQuery,
    ) -> StoreResult<ConversationPage> {
        let cursor = query.decoded_cursor()?;
        let limit = query.effective_limit(self.default_page_limit, self.max_page_limit);

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, conversation_id, user_id, title, created_at, updated_at FROM conversations WHERE user_id = ",
        );
        qb.push_bind(user.to_string());

        if let Some(ids) = &query.conversation_ids {
            if ids.is_empty() {
                return Ok(ConversationPage::default());
            }
            qb.push(" AND id IN (");
            let mut separated = qb.separated(", ");
            for id in ids {
                separated.push_bind(id.to_string());
            }
            separated.push_unseparated(")");
        }

        if let Some(cursor) = cursor {
            qb.push(" AND (updated_at < ")
                .push_bind(cursor.updated_at_ms)
                .push(" OR (updated_at = ")
                .push_bind(cursor.updated_at_ms)
                .push(" AND id < ")
                .push_bind(cursor.id.to_string())
                .push("))");
        }

        qb.push(" ORDER BY updated_at DESC, id DESC LIMIT ")
            .push_bind(limit + 1);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let conversations = rows
            .iter()
            .map(conversation_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(ConversationPage::from_rows(conversations, limit))
    }
}

#[async_trait]
impl ProjectStore for SqliteStore {
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

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("INSERT INTO projects (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(project.id.to_string())
            .bind(&project.name)
            .bind(ts.timestamp_millis())
            .bind(ts.timestamp_millis())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let members = project
            .prompt_group_ids
            .iter()
            .map(|id| (PROJECT_PROMPT_GROUP, id.to_string()))
            .chain(project.agent_ids.iter().map(|id| (PROJECT_AGENT, id.clone())))
            .chain(
                project
                    .conversation_ids
                    .iter()
                    .map(|id| (MemberKind::Conversation.as_str(), id.to_string())),
            )
            .chain(
                project
                    .file_ids
                    .iter()
                    .map(|id| (MemberKind::File.as_str(), id.to_string())),
            );
        for (kind, member_id) in members {
            sqlx::query("INSERT INTO project_members (project_id, kind, member_id) VALUES (?, ?, ?)")
                .bind(project.id.to_string())
                .bind(kind)
                .bind(member_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(project)
    }

    async fn get_project(&self, id: IdRef) -> StoreResult<Option<Project>> {
        let id = id.resolve()?;
        let row = sqlx::query("SELECT id, name, created_at, updated_at FROM projects WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut project = Project {
            id,
            name: row.get("name"),
            prompt_group_ids: Vec::new(),
            agent_ids: Vec::new(),
            conversation_ids: Vec::new(),
            file_ids: Vec::new(),
            created_at: from_millis(row.get("created_at")),
            updated_at: from_millis(row.get("updated_at")),
        };

        let members = sqlx::query(
            "SELECT kind, member_id FROM project_members WHERE project_id = ? ORDER BY seq ASC",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        for member in &members {
            let kind: String = member.get("kind");
            let member_id: String = member.get("member_id");
            match kind.as_str() {
                PROJECT_PROMPT_GROUP => project.prompt_group_ids.push(parse_id(member_id)?),
                PROJECT_AGENT => project.agent_ids.push(member_id),
                "conversation" => project.conversation_ids.push(parse_id(member_id)?),
                "file" => project.file_ids.push(parse_id(member_id)?),
                other => {
                    return Err(StoreError::backend(anyhow!(
                        "unknown project member kind: {}",
                        other
                    )))
                }
            }
        }
        Ok(Some(project))
    }
}

#[async_trait]
impl Directory for SqliteStore {
    async fn create_user(&self, email: &str, name: Option<&str>) -> StoreResult<User> {
        let user = User {
            id: ObjectId::new(),
            email: email.to_string(),
            name: name.map(str::to_string),
            created_at: now(),
        };
        sqlx::query("INSERT INTO users (id, email, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(user.id.to_string())
            .bind(&user.email)
            .bind(&user.name)
            .bind(user.created_at.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(user)
    }

    async fn user_exists(&self, id: &ObjectId) -> StoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?)")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
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
        sqlx::query(
            r#"
            INSERT INTO conversations (id, conversation_id, user_id, title, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(conversation.id.to_string())
        .bind(&conversation.conversation_id)
        .bind(conversation.user.to_string())
        .bind(&conversation.title)
        .bind(ts.timestamp_millis())
        .bind(ts.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
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
        sqlx::query(
            r#"
            INSERT INTO files (id, file_id, user_id, filename, bytes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.id.to_string())
        .bind(&file.file_id)
        .bind(file.user.to_string())
        .bind(&file.filename)
        .bind(file.bytes)
        .bind(ts.timestamp_millis())
        .bind(ts.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(file)
    }

    async fn count_existing(&self, kind: MemberKind, ids: &[ObjectId]) -> StoreResult<usize> {
        let ids = dedup_ids(ids);
        if ids.is_empty() {
            return Ok(0);
        }
        let table = match kind {
            MemberKind::Conversation => "conversations",
            MemberKind::File => "files",
        };
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT COUNT(*) FROM {} WHERE id IN (", table));
        let mut separated = qb.separated(", ");
        for id in &ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(")");

        let count: i64 = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count as usize)
    }
}
