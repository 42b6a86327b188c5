//! REST routes exercised through the router with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use knowledge_hub::auth::TokenIssuer;
use knowledge_hub::config::Config;
use knowledge_hub::server::{router, AppState};
use knowledge_hub::sqlite_store::SqliteStore;
use knowledge_hub::{db, migrate};
use knowledge_hub_core::models::{
    KnowledgeBase, KnowledgeBaseListing, MemberKind, NewConversation, NewKnowledgeBase, User,
};
use knowledge_hub_core::store::memory::InMemoryStore;
use knowledge_hub_core::store::{ConversationLister, Directory, KnowledgeBaseStore};
use knowledge_hub_core::{IdRef, ObjectId, StoreError, StoreResult};

const SECRET: &str = "test-secret";

struct Harness<S = SqliteStore> {
    _tmp: Option<TempDir>,
    store: Arc<S>,
    app: Router,
    issuer: TokenIssuer,
}

impl Harness {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let config = Config::for_database(tmp.path().join("khub.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        let store = Arc::new(SqliteStore::new(pool));
        Self::build(Some(tmp), config, store.clone(), store)
    }
}

impl Harness<InMemoryStore> {
    fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self::build(None, Config::for_database("unused.sqlite"), store.clone(), store)
    }

    /// Knowledge base writes go through `knowledge_bases`; users and
    /// conversations still land in the in-memory store.
    fn in_memory_with(
        knowledge_bases: impl FnOnce(Arc<InMemoryStore>) -> Arc<dyn KnowledgeBaseStore>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let knowledge_bases = knowledge_bases(store.clone());
        Self::build(None, Config::for_database("unused.sqlite"), knowledge_bases, store)
    }
}

impl<S> Harness<S>
where
    S: Directory + ConversationLister + 'static,
{
    fn build(
        tmp: Option<TempDir>,
        mut config: Config,
        knowledge_bases: Arc<dyn KnowledgeBaseStore>,
        store: Arc<S>,
    ) -> Self {
        config.auth.jwt_secret = SECRET.to_string();
        let lister: Arc<dyn ConversationLister> = store.clone();
        let state = AppState::new(config, knowledge_bases, lister).unwrap();

        Self {
            _tmp: tmp,
            store,
            app: router(state),
            issuer: TokenIssuer::new(SECRET, 3600),
        }
    }

    async fn user(&self, email: &str) -> (User, String) {
        let user = self.store.create_user(email, None).await.unwrap();
        let token = self.issuer.issue(&user.id).unwrap();
        (user, token)
    }

    async fn conversation(&self, user: &User, title: &str) -> ObjectId {
        self.store
            .create_conversation(NewConversation {
                user: user.id,
                title: Some(title.to_string()),
            })
            .await
            .unwrap()
            .id
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

#[tokio::test]
async fn test_health_is_public() {
    let h = Harness::new().await;
    let (status, body) = h.send("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_routes_require_authentication() {
    let h = Harness::new().await;

    let (status, body) = h.send("GET", "/api/knowledge-bases", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let forged = TokenIssuer::new("other-secret", 60)
        .issue(&ObjectId::new())
        .unwrap();
    let (status, _) = h
        .send("GET", "/api/knowledge-bases", Some(&forged), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cookie_token_is_accepted() {
    let h = Harness::new().await;
    let (_, token) = h.user("alice@example.com").await;

    let request = Request::builder()
        .uri("/api/knowledge-bases")
        .header(header::COOKIE, format!("lang=en; token={}", token))
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_validates_and_trims_name() {
    let h = Harness::new().await;
    let (alice, token) = h.user("alice@example.com").await;

    let (status, body) = h
        .send(
            "POST",
            "/api/knowledge-bases",
            Some(&token),
            Some(json!({"name": "  Research  ", "description": "papers", "slug": "research"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "Research");
    assert_eq!(body["description"], "papers");
    assert_eq!(body["slug"], "research");
    assert_eq!(body["user"], alice.id.to_string());
    assert_eq!(body["conversationIds"], json!([]));

    for bad in [json!({}), json!({"name": "   "}), json!({"name": 42})] {
        let (status, body) = h
            .send("POST", "/api/knowledge-bases", Some(&token), Some(bad))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "Name is required");
    }

    let (status, body) = h
        .send(
            "POST",
            "/api/knowledge-bases",
            Some(&token),
            Some(json!({"name": "Research"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn test_list_is_scoped_to_caller() {
    let h = Harness::new().await;
    let (alice, alice_token) = h.user("alice@example.com").await;
    let (_, bob_token) = h.user("bob@example.com").await;

    let (_, kb) = h
        .send(
            "POST",
            "/api/knowledge-bases",
            Some(&alice_token),
            Some(json!({"name": "Alice KB"})),
        )
        .await;
    let conv = h.conversation(&alice, "hello").await;
    let kb_id = kb["_id"].as_str().unwrap().to_string();
    h.send(
        "POST",
        &format!("/api/knowledge-bases/{}/addConversation", kb_id),
        Some(&alice_token),
        Some(json!({"conversationId": conv.to_string()})),
    )
    .await;

    let (status, list) = h
        .send("GET", "/api/knowledge-bases", Some(&alice_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "Alice KB");
    assert_eq!(list[0]["conversations"][0]["title"], "hello");
    assert_eq!(list[0]["conversations"][0]["_id"], conv.to_string());

    let (_, list) = h
        .send("GET", "/api/knowledge-bases", Some(&bob_token), None)
        .await;
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn test_membership_routes() {
    let h = Harness::new().await;
    let (_, token) = h.user("alice@example.com").await;
    let (_, bob_token) = h.user("bob@example.com").await;
    h.send(
        "POST",
        "/api/knowledge-bases",
        Some(&token),
        Some(json!({"name": "Docs", "slug": "docs"})),
    )
    .await;

    // any well-formed id is accepted
    let foreign = ObjectId::new().to_string();
    let (status, kb) = h
        .send(
            "POST",
            "/api/knowledge-bases/docs/addConversation",
            Some(&token),
            Some(json!({"conversationId": foreign})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(kb["conversationIds"], json!([foreign]));

    let (_, kb) = h
        .send(
            "POST",
            "/api/knowledge-bases/docs/addConversation",
            Some(&token),
            Some(json!({"conversationId": foreign})),
        )
        .await;
    assert_eq!(kb["conversationIds"], json!([foreign]));

    let (status, kb) = h
        .send(
            "POST",
            "/api/knowledge-bases/docs/removeConversation",
            Some(&token),
            Some(json!({"conversationId": foreign})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(kb["conversationIds"], json!([]));

    let (status, _) = h
        .send(
            "POST",
            "/api/knowledge-bases/docs/addConversation",
            Some(&bob_token),
            Some(json!({"conversationId": foreign})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = h
        .send(
            "POST",
            "/api/knowledge-bases/docs/addConversation",
            Some(&token),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_conversation_pagination() {
    let h = Harness::new().await;
    let (alice, token) = h.user("alice@example.com").await;
    let (_, bob_token) = h.user("bob@example.com").await;
    h.send(
        "POST",
        "/api/knowledge-bases",
        Some(&token),
        Some(json!({"name": "Paged", "slug": "paged"})),
    )
    .await;

    for i in 0..3 {
        let conv = h.conversation(&alice, &format!("c{}", i)).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        h.send(
            "POST",
            "/api/knowledge-bases/paged/addConversation",
            Some(&token),
            Some(json!({"conversationId": conv.to_string()})),
        )
        .await;
    }
    h.conversation(&alice, "not a member").await;

    let (status, page) = h
        .send(
            "GET",
            "/api/knowledge-bases/paged/conversations?limit=2",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["conversations"][0]["title"], "c2");
    assert_eq!(page["conversations"][1]["title"], "c1");
    let cursor = page["nextCursor"].as_str().unwrap().to_string();

    let (_, page) = h
        .send(
            "GET",
            &format!(
                "/api/knowledge-bases/paged/conversations?limit=2&cursor={}",
                cursor
            ),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(page["conversations"].as_array().unwrap().len(), 1);
    assert_eq!(page["conversations"][0]["title"], "c0");
    assert!(page["nextCursor"].is_null());

    // a non-numeric limit falls back to the default
    let (status, page) = h
        .send(
            "GET",
            "/api/knowledge-bases/paged/conversations?limit=abc",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["conversations"].as_array().unwrap().len(), 3);

    let (status, body) = h
        .send(
            "GET",
            "/api/knowledge-bases/paged/conversations?cursor=garbage",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "internal");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Failed to retrieve knowledge base conversations: "));

    let (status, body) = h
        .send(
            "GET",
            "/api/knowledge-bases/paged/conversations",
            Some(&bob_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "Knowledge base not found");
}

#[tokio::test]
async fn test_patch_applies_both_fields() {
    let h = Harness::new().await;
    let (_, token) = h.user("alice@example.com").await;
    let (_, kb) = h
        .send(
            "POST",
            "/api/knowledge-bases",
            Some(&token),
            Some(json!({"name": "Draft"})),
        )
        .await;
    let uri = format!("/api/knowledge-bases/{}", kb["_id"].as_str().unwrap());

    let (status, updated) = h
        .send(
            "PATCH",
            &uri,
            Some(&token),
            Some(json!({"name": "Final", "description": "done"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Final");
    assert_eq!(updated["description"], "done");

    let (status, updated) = h.send("PATCH", &uri, Some(&token), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(updated.is_null());
}

#[tokio::test]
async fn test_patch_stores_empty_strings() {
    let h = Harness::new().await;
    let (_, token) = h.user("alice@example.com").await;
    let (_, kb) = h
        .send(
            "POST",
            "/api/knowledge-bases",
            Some(&token),
            Some(json!({"name": "Draft", "description": "notes"})),
        )
        .await;
    let uri = format!("/api/knowledge-bases/{}", kb["_id"].as_str().unwrap());

    let (status, updated) = h
        .send(
            "PATCH",
            &uri,
            Some(&token),
            Some(json!({"name": "", "description": ""})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "");
    assert_eq!(updated["description"], "");
}

#[tokio::test]
async fn test_patch_name_collision_is_internal() {
    let h = Harness::new().await;
    let (_, token) = h.user("alice@example.com").await;
    for name in ["Taken", "Other"] {
        h.send(
            "POST",
            "/api/knowledge-bases",
            Some(&token),
            Some(json!({ "name": name })),
        )
        .await;
    }
    let (_, listed) = h.send("GET", "/api/knowledge-bases", Some(&token), None).await;
    let other = listed
        .as_array()
        .unwrap()
        .iter()
        .find(|l| l["name"] == "Other")
        .unwrap()["_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) = h
        .send(
            "PATCH",
            &format!("/api/knowledge-bases/{}", other),
            Some(&token),
            Some(json!({"name": "Taken"})),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "internal");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Failed to update knowledge base: "));
}

/// Delegates to the in-memory store but fails every description write.
struct FailingDescriptions(Arc<InMemoryStore>);

#[async_trait]
impl KnowledgeBaseStore for FailingDescriptions {
    async fn create(&self, data: NewKnowledgeBase) -> StoreResult<KnowledgeBase> {
        self.0.create(data).await
    }

    async fn delete_by_id(&self, id: IdRef) -> StoreResult<Option<KnowledgeBase>> {
        self.0.delete_by_id(id).await
    }

    async fn update_name(&self, id: IdRef, name: &str) -> StoreResult<Option<KnowledgeBase>> {
        self.0.update_name(id, name).await
    }

    async fn update_description(
        &self,
        _id: IdRef,
        _description: &str,
    ) -> StoreResult<Option<KnowledgeBase>> {
        Err(StoreError::backend(anyhow::anyhow!("description write failed")))
    }

    async fn add_member(
        &self,
        kb_id: IdRef,
        kind: MemberKind,
        member: IdRef,
    ) -> StoreResult<Option<KnowledgeBase>> {
        self.0.add_member(kb_id, kind, member).await
    }

    async fn remove_member(
        &self,
        kb_id: IdRef,
        kind: MemberKind,
        member: IdRef,
    ) -> StoreResult<Option<KnowledgeBase>> {
        self.0.remove_member(kb_id, kind, member).await
    }

    async fn find_for_user(
        &self,
        user: &ObjectId,
        id_or_slug: &str,
    ) -> StoreResult<Option<KnowledgeBase>> {
        self.0.find_for_user(user, id_or_slug).await
    }

    async fn list_for_user(
        &self,
        user: &ObjectId,
        preview_limit: usize,
    ) -> StoreResult<Vec<KnowledgeBaseListing>> {
        self.0.list_for_user(user, preview_limit).await
    }
}

#[tokio::test]
async fn test_patch_keeps_name_when_description_fails() {
    let h = Harness::in_memory_with(|store| Arc::new(FailingDescriptions(store)));
    let (alice, token) = h.user("alice@example.com").await;
    let kb = h
        .store
        .create(NewKnowledgeBase::new(alice.id, "Before"))
        .await
        .unwrap();

    let (status, body) = h
        .send(
            "PATCH",
            &format!("/api/knowledge-bases/{}", kb.id),
            Some(&token),
            Some(json!({"name": "After", "description": "lost"})),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body["error"]["message"],
        "Failed to update knowledge base: description write failed"
    );

    let stored = h
        .store
        .find_for_user(&alice.id, &kb.id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.name, "After");
    assert!(stored.description.is_none());
}

#[tokio::test]
async fn test_in_memory_backend_serves_routes() {
    let h = Harness::in_memory();
    let (alice, token) = h.user("alice@example.com").await;
    let conv = h.conversation(&alice, "Standup").await;

    let (status, kb) = h
        .send(
            "POST",
            "/api/knowledge-bases",
            Some(&token),
            Some(json!({"name": "Team", "slug": "team"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(kb["name"], "Team");

    let (status, _) = h
        .send(
            "POST",
            "/api/knowledge-bases",
            Some(&token),
            Some(json!({"name": "Team"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, updated) = h
        .send(
            "POST",
            "/api/knowledge-bases/team/addConversation",
            Some(&token),
            Some(json!({ "conversationId": conv.to_string() })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(updated["conversationIds"], json!([conv.to_string()]));

    let (status, listed) = h.send("GET", "/api/knowledge-bases", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["conversations"][0]["title"], "Standup");

    let (status, page) = h
        .send(
            "GET",
            "/api/knowledge-bases/team/conversations",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["conversations"][0]["title"], "Standup");
    assert!(page["nextCursor"].is_null());
}

#[tokio::test]
async fn test_delete_is_scoped_to_owner() {
    let h = Harness::new().await;
    let (alice, token) = h.user("alice@example.com").await;
    let (_, bob_token) = h.user("bob@example.com").await;
    let (_, kb) = h
        .send(
            "POST",
            "/api/knowledge-bases",
            Some(&token),
            Some(json!({"name": "Keep"})),
        )
        .await;
    let kb_id = kb["_id"].as_str().unwrap().to_string();
    let uri = format!("/api/knowledge-bases/{}", kb_id);

    let (status, body) = h.send("DELETE", &uri, Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());

    assert!(h
        .store
        .find_for_user(&alice.id, &kb_id)
        .await
        .unwrap()
        .is_some());

    let (status, body) = h.send("DELETE", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["_id"], kb_id);

    let (status, body) = h
        .send("DELETE", "/api/knowledge-bases/not-an-id", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "internal");
}
