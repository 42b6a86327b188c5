//! "New knowledge base" dialog.

use super::route::new_chat_path;
use super::state::KnowledgeBaseList;
use super::{ClientError, CreateKnowledgeBase, KnowledgeHubClient};

/// What the caller should do after a submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogOutcome {
    /// Blank name; nothing happened.
    Ignored,
    /// Created; go to the new knowledge base's first chat.
    Navigate(String),
}

#[derive(Debug, Default)]
pub struct CreateKnowledgeBaseDialog {
    open: bool,
    name: String,
}

impl CreateKnowledgeBaseDialog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    pub fn close(&mut self) {
        self.open = false;
        self.name.clear();
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Creates the knowledge base remotely.
    ///
    /// Only a successful create refreshes `list`, closes the dialog and
    /// navigates. On error the dialog keeps its input and stays open.
    pub async fn submit(
        &mut self,
        client: &KnowledgeHubClient,
        list: &KnowledgeBaseList,
    ) -> Result<DialogOutcome, ClientError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Ok(DialogOutcome::Ignored);
        }

        let created = client
            .create_knowledge_base(&CreateKnowledgeBase {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "failed to create knowledge base"))?;

        if let Err(e) = list.refresh(client).await {
            tracing::warn!(error = %e, "knowledge base list refresh failed");
        }
        self.close();
        Ok(DialogOutcome::Navigate(new_chat_path(&created.display_id())))
    }
}
