//! CLI command implementations.
//!
//! Each command opens the configured database, runs one store operation and
//! prints the result to stdout. Ids are printed bare; documents are printed
//! as pretty JSON in the same shape the HTTP API returns.

use anyhow::{Context, Result};
use serde::Serialize;

use knowledge_hub_core::models::{MemberKind, NewConversation, NewFile, NewKnowledgeBase, NewProject};
use knowledge_hub_core::pagination::CursorQuery;
use knowledge_hub_core::store::{ConversationLister, Directory, KnowledgeBaseStore, ProjectStore};
use knowledge_hub_core::{IdRef, ObjectId};

use crate::auth::TokenIssuer;
use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = db::connect(config).await?;
    Ok(SqliteStore::new(pool)
        .with_page_limits(config.pagination.default_limit, config.pagination.max_limit))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_user(raw: &str) -> Result<ObjectId> {
    raw.parse()
        .with_context(|| format!("invalid user id: {}", raw))
}

pub async fn add_user(config: &Config, email: &str, name: Option<&str>) -> Result<()> {
    let store = open_store(config).await?;
    let user = store.create_user(email, name).await?;
    store.pool().close().await;
    println!("{}", user.id);
    Ok(())
}

pub fn issue_token(config: &Config, user: &str, ttl_secs: Option<u64>) -> Result<()> {
    let user = parse_user(user)?;
    let issuer = TokenIssuer::new(
        config.jwt_secret()?,
        ttl_secs.unwrap_or(config.auth.token_ttl_secs),
    );
    println!("{}", issuer.issue(&user)?);
    Ok(())
}

pub async fn add_conversation_record(
    config: &Config,
    user: &str,
    title: Option<String>,
) -> Result<()> {
    let user = parse_user(user)?;
    let store = open_store(config).await?;
    let conversation = store
        .create_conversation(NewConversation { user, title })
        .await?;
    store.pool().close().await;
    print_json(&conversation)
}

pub async fn add_file_record(config: &Config, user: &str, filename: &str, bytes: i64) -> Result<()> {
    let user = parse_user(user)?;
    let store = open_store(config).await?;
    let file = store
        .create_file(NewFile {
            user,
            filename: filename.to_string(),
            bytes,
        })
        .await?;
    store.pool().close().await;
    print_json(&file)
}

pub async fn list_knowledge_bases(config: &Config, user: &str) -> Result<()> {
    let user = parse_user(user)?;
    let store = open_store(config).await?;
    let listings = store
        .list_for_user(&user, config.knowledge_bases.preview_limit)
        .await?;
    store.pool().close().await;

    if listings.is_empty() {
        println!("No knowledge bases.");
        return Ok(());
    }
    for listing in &listings {
        let kb = &listing.knowledge_base;
        println!(
            "{}  {}  ({} conversations, {} files)",
            kb.display_id(),
            kb.name,
            kb.conversation_ids.len(),
            kb.file_ids.len()
        );
        for preview in &listing.conversations {
            println!("    {}  {}", preview.conversation_id, preview.title);
        }
    }
    Ok(())
}

pub async fn create_knowledge_base(
    config: &Config,
    user: &str,
    name: &str,
    description: Option<String>,
    slug: Option<String>,
) -> Result<()> {
    let user = parse_user(user)?;
    let mut data = NewKnowledgeBase::new(user, name.trim());
    data.description = description;
    data.slug = slug;

    let store = open_store(config).await?;
    let kb = store.create(data).await?;
    store.pool().close().await;
    print_json(&kb)
}

/// Field changed by [`update_knowledge_base`].
#[derive(Debug, Clone, Copy)]
pub enum UpdateField {
    Name,
    Description,
}

pub async fn update_knowledge_base(
    config: &Config,
    id: &str,
    field: UpdateField,
    value: &str,
) -> Result<()> {
    let store = open_store(config).await?;
    let updated = match field {
        UpdateField::Name => store.update_name(IdRef::from(id), value).await?,
        UpdateField::Description => store.update_description(IdRef::from(id), value).await?,
    };
    store.pool().close().await;

    match updated {
        Some(kb) => print_json(&kb),
        None => anyhow::bail!("knowledge base not found: {}", id),
    }
}

pub async fn delete_knowledge_base(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let deleted = store.delete_by_id(IdRef::from(id)).await?;
    store.pool().close().await;

    match deleted {
        Some(kb) => {
            println!("Deleted {} ({})", kb.id, kb.name);
            Ok(())
        }
        None => anyhow::bail!("knowledge base not found: {}", id),
    }
}

/// Adds (`add = true`) or removes a conversation or file.
pub async fn change_membership(
    config: &Config,
    kb_id: &str,
    kind: MemberKind,
    member_id: &str,
    add: bool,
) -> Result<()> {
    let store = open_store(config).await?;
    let result = if add {
        store
            .add_member(IdRef::from(kb_id), kind, IdRef::from(member_id))
            .await
    } else {
        store
            .remove_member(IdRef::from(kb_id), kind, IdRef::from(member_id))
            .await
    };
    store.pool().close().await;

    match result? {
        Some(kb) => print_json(&kb),
        None => anyhow::bail!("knowledge base not found: {}", kb_id),
    }
}

pub async fn list_conversations(
    config: &Config,
    id_or_slug: &str,
    user: &str,
    cursor: Option<String>,
    limit: Option<i64>,
) -> Result<()> {
    let user = parse_user(user)?;
    let store = open_store(config).await?;

    let kb = match store.find_for_user(&user, id_or_slug).await? {
        Some(kb) => kb,
        None => {
            store.pool().close().await;
            anyhow::bail!("knowledge base not found: {}", id_or_slug);
        }
    };
    let page = store
        .list_by_cursor(
            &user,
            CursorQuery {
                cursor,
                limit,
                conversation_ids: Some(kb.conversation_ids),
            },
        )
        .await;
    store.pool().close().await;
    print_json(&page?)
}

pub async fn create_project(config: &Config, name: &str, agent_ids: Vec<String>) -> Result<()> {
    let store = open_store(config).await?;
    let project = store
        .create_project(NewProject {
            name: name.to_string(),
            agent_ids,
            ..Default::default()
        })
        .await?;
    store.pool().close().await;
    print_json(&project)
}

pub async fn get_project(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let project = store.get_project(IdRef::from(id)).await?;
    store.pool().close().await;

    match project {
        Some(project) => print_json(&project),
        None => anyhow::bail!("project not found: {}", id),
    }
}
