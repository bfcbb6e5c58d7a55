use std::path::PathBuf;

use crate::api::upload::upload_path;
use crate::error::{ClientError, ClientResult};
use crate::models::{split_list, Complexity, NewTask, Task};
use crate::queries::Queries;

pub const DEFAULT_PRIORITY: u8 = 3;

/// A task as typed into the composer, before any upload has happened.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub complexity: Complexity,
    /// Comma-separated, as entered.
    pub tags: String,
    pub priority: u8,
    pub customer_name: String,
    pub project_name: String,
    pub prd_file: Option<PathBuf>,
    pub attachment_files: Vec<PathBuf>,
}

impl Default for TaskDraft {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            complexity: Complexity::default(),
            tags: String::new(),
            priority: DEFAULT_PRIORITY,
            customer_name: String::new(),
            project_name: String::new(),
            prd_file: None,
            attachment_files: Vec::new(),
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl TaskDraft {
    pub fn validate(&self) -> ClientResult<()> {
        if self.title.trim().is_empty() {
            return Err(ClientError::validation("title must not be empty"));
        }
        if !(1..=5).contains(&self.priority) {
            return Err(ClientError::validation(format!(
                "priority must be between 1 and 5, got {}",
                self.priority
            )));
        }
        let named = non_blank(&self.customer_name).is_some() && non_blank(&self.project_name).is_some();
        if self.prd_file.is_some() && !named {
            return Err(ClientError::validation(
                "a PRD needs both a customer name and a project name",
            ));
        }
        Ok(())
    }

    /// The create payload, given the public URLs of already uploaded files.
    pub fn to_new_task(&self, attachments: Vec<String>, prd_url: Option<String>) -> NewTask {
        NewTask {
            title: self.title.trim().to_string(),
            description: non_blank(&self.description),
            complexity: self.complexity,
            tags: split_list(&self.tags),
            priority: Some(self.priority),
            attachments,
            customer_name: non_blank(&self.customer_name),
            project_name: non_blank(&self.project_name),
            prd_url,
        }
    }
}

/// Validates the draft, uploads its files, then creates the task. Task lists
/// are invalidated once the server confirms.
pub async fn submit(queries: &Queries, draft: &TaskDraft) -> ClientResult<Task> {
    draft.validate()?;
    let token = queries.write_token()?;
    let source = queries.source().as_ref();

    let mut attachments = Vec::with_capacity(draft.attachment_files.len());
    for path in &draft.attachment_files {
        attachments.push(upload_path(source, token.as_deref(), path).await?);
    }
    let prd_url = match &draft.prd_file {
        Some(path) => Some(upload_path(source, token.as_deref(), path).await?),
        None => None,
    };

    queries
        .create_task(&draft.to_new_task(attachments, prd_url))
        .await
}
