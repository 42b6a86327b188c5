//! Session-scoped knowledge base and project lists, and the navigation panel.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::watch;

use knowledge_hub_core::models::KnowledgeBaseListing;
use knowledge_hub_core::ObjectId;

use super::route::{
    conversation_path, knowledge_base_path, project_conversation_path, project_path,
};
use super::{ClientError, KnowledgeHubClient};

/// The caller's knowledge bases as last loaded.
///
/// Observers hold a [`watch::Receiver`] from [`subscribe`](Self::subscribe)
/// and see every replacement.
pub struct KnowledgeBaseList {
    tx: watch::Sender<Vec<KnowledgeBaseListing>>,
}

impl Default for KnowledgeBaseList {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeBaseList {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(Vec::new()),
        }
    }

    pub fn set(&self, items: Vec<KnowledgeBaseListing>) {
        self.tx.send_replace(items);
    }

    pub fn snapshot(&self) -> Vec<KnowledgeBaseListing> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<KnowledgeBaseListing>> {
        self.tx.subscribe()
    }

    /// Reloads from the server. On error the current value is kept.
    pub async fn refresh(&self, client: &KnowledgeHubClient) -> Result<(), ClientError> {
        let items = client.list_knowledge_bases().await?;
        tracing::debug!(count = items.len(), "knowledge base list refreshed");
        self.set(items);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConversation {
    pub id: String,
    pub title: String,
}

/// A project as the client keeps it. Projects have no listing route, so
/// these entries exist only in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalProject {
    pub id: String,
    #[serde(default)]
    pub conversations: Vec<ProjectConversation>,
}

impl LocalProject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            conversations: Vec::new(),
        }
    }
}

/// Local-only project list shown above the knowledge bases.
pub struct ProjectList {
    tx: watch::Sender<Vec<LocalProject>>,
}

impl Default for ProjectList {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectList {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(Vec::new()),
        }
    }

    pub fn set(&self, items: Vec<LocalProject>) {
        self.tx.send_replace(items);
    }

    /// Inserts a project, or replaces the one with the same id in place.
    pub fn add(&self, project: LocalProject) {
        self.tx.send_modify(|items| {
            match items.iter_mut().find(|p| p.id == project.id) {
                Some(existing) => *existing = project,
                None => items.push(project),
            }
        });
    }

    pub fn snapshot(&self) -> Vec<LocalProject> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<LocalProject>> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavLink {
    pub title: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavEntry {
    pub id: ObjectId,
    pub name: String,
    pub href: String,
    pub expanded: bool,
    pub conversations: Vec<NavLink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectEntry {
    pub id: String,
    pub href: String,
    pub expanded: bool,
    pub conversations: Vec<NavLink>,
}

/// Sidebar sections for projects and knowledge bases, above the chats.
///
/// Expansion is tracked here per entry and starts collapsed.
#[derive(Debug, Default)]
pub struct NavPanel {
    expanded: HashSet<ObjectId>,
    expanded_projects: HashSet<String>,
}

impl NavPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips an entry and returns whether it is now expanded.
    pub fn toggle(&mut self, id: ObjectId) -> bool {
        if self.expanded.remove(&id) {
            false
        } else {
            self.expanded.insert(id);
            true
        }
    }

    pub fn is_expanded(&self, id: &ObjectId) -> bool {
        self.expanded.contains(id)
    }

    pub fn toggle_project(&mut self, id: &str) -> bool {
        if self.expanded_projects.remove(id) {
            false
        } else {
            self.expanded_projects.insert(id.to_string());
            true
        }
    }

    /// Project entries, rendered above [`render`](Self::render)'s.
    pub fn render_projects(&self, projects: &[LocalProject]) -> Vec<ProjectEntry> {
        projects
            .iter()
            .map(|project| ProjectEntry {
                id: project.id.clone(),
                href: project_path(&project.id),
                expanded: self.expanded_projects.contains(&project.id),
                conversations: project
                    .conversations
                    .iter()
                    .map(|c| NavLink {
                        title: c.title.clone(),
                        href: project_conversation_path(&project.id, &c.id),
                    })
                    .collect(),
            })
            .collect()
    }

    pub fn render(&self, items: &[KnowledgeBaseListing]) -> Vec<NavEntry> {
        items
            .iter()
            .map(|item| {
                let kb = &item.knowledge_base;
                let display_id = kb.display_id();
                NavEntry {
                    id: kb.id,
                    name: kb.name.clone(),
                    href: knowledge_base_path(&display_id),
                    expanded: self.is_expanded(&kb.id),
                    conversations: item
                        .conversations
                        .iter()
                        .map(|c| NavLink {
                            title: c.title.clone(),
                            href: conversation_path(&display_id, &c.conversation_id),
                        })
                        .collect(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_hub_core::models::{now, ConversationPreview, KnowledgeBase};

    fn listing(name: &str, slug: Option<&str>) -> KnowledgeBaseListing {
        let ts = now();
        KnowledgeBaseListing {
            knowledge_base: KnowledgeBase {
                id: ObjectId::new(),
                user: ObjectId::new(),
                name: name.to_string(),
                description: None,
                slug: slug.map(str::to_string),
                conversation_ids: Vec::new(),
                file_ids: Vec::new(),
                created_at: ts,
                updated_at: ts,
            },
            conversations: vec![ConversationPreview {
                id: ObjectId::new(),
                conversation_id: "conv-1".to_string(),
                title: "Hello".to_string(),
            }],
        }
    }

    #[test]
    fn test_render_links_by_slug_or_id() {
        let items = vec![listing("Docs", Some("docs")), listing("Misc", None)];
        let entries = NavPanel::new().render(&items);

        assert_eq!(entries[0].href, "/knowledge-bases/docs/c");
        assert_eq!(entries[0].conversations[0].href, "/knowledge-bases/docs/c/conv-1");
        let id = items[1].knowledge_base.id.to_string();
        assert_eq!(entries[1].href, format!("/knowledge-bases/{}/c", id));
    }

    #[test]
    fn test_entries_start_collapsed_and_toggle() {
        let items = vec![listing("Docs", None)];
        let id = items[0].knowledge_base.id;
        let mut panel = NavPanel::new();

        assert!(!panel.render(&items)[0].expanded);
        assert!(panel.toggle(id));
        assert!(panel.render(&items)[0].expanded);
        assert!(!panel.toggle(id));
    }

    #[test]
    fn test_projects_render_with_their_conversations() {
        let projects: Vec<LocalProject> = serde_json::from_str(
            r#"[{"id": "p1", "conversations": [{"id": "c1", "title": "Plan"}]}, {"id": "p 2"}]"#,
        )
        .unwrap();
        let mut panel = NavPanel::new();
        let entries = panel.render_projects(&projects);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].href, "/projects/p1/c");
        assert_eq!(
            entries[0].conversations,
            vec![NavLink {
                title: "Plan".to_string(),
                href: "/projects/p1/c/c1".to_string(),
            }]
        );
        assert_eq!(entries[1].href, "/projects/p%202/c");
        assert!(entries[1].conversations.is_empty());

        assert!(!entries[0].expanded);
        assert!(panel.toggle_project("p1"));
        assert!(panel.render_projects(&projects)[0].expanded);
        assert!(!panel.render_projects(&projects)[1].expanded);
        assert!(!panel.toggle_project("p1"));
    }

    #[test]
    fn test_project_list_adds_and_replaces() {
        let list = ProjectList::new();
        let mut rx = list.subscribe();

        list.add(LocalProject::new("p1"));
        list.add(LocalProject::new("p2"));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        let mut updated = LocalProject::new("p1");
        updated.conversations.push(ProjectConversation {
            id: "c1".to_string(),
            title: "Kickoff".to_string(),
        });
        list.add(updated);
        assert!(rx.has_changed().unwrap());

        let items = list.snapshot();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "p1");
        assert_eq!(items[0].conversations[0].title, "Kickoff");
        assert_eq!(items[1].id, "p2");

        list.set(Vec::new());
        assert!(list.snapshot().is_empty());
    }

    #[test]
    fn test_list_notifies_subscribers() {
        let list = KnowledgeBaseList::new();
        let mut rx = list.subscribe();
        assert!(list.snapshot().is_empty());

        list.set(vec![listing("Docs", None)]);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);
        assert_eq!(list.snapshot()[0].knowledge_base.name, "Docs");
    }
}
