use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::watch;

use crate::api::upload::upload_path;
use crate::error::{ClientError, ClientResult};
use crate::models::{Task, TaskPatch, TaskStatus};
use crate::queries::Queries;

/// What a task view renders: the last server-confirmed task and the error
/// from the most recent failed mutation, if any.
#[derive(Debug, Clone)]
pub struct EditorView {
    pub task: Task,
    pub last_error: Option<String>,
}

/// Applies partial updates to one task.
///
/// Nothing is applied locally before the server answers. A successful
/// response replaces the local task wholesale and marks task lists stale; a
/// failure leaves the task as it was. Concurrent mutations are not merged:
/// whichever response lands last is what the view shows.
pub struct TaskEditor {
    queries: Arc<Queries>,
    view: watch::Sender<EditorView>,
}

impl TaskEditor {
    pub fn new(queries: Arc<Queries>, task: Task) -> Self {
        let (view, _) = watch::channel(EditorView {
            task,
            last_error: None,
        });
        Self { queries, view }
    }

    pub fn task(&self) -> Task {
        self.view.borrow().task.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.view.borrow().last_error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EditorView> {
        self.view.subscribe()
    }

    fn task_id(&self) -> String {
        self.view.borrow().task.id.clone()
    }

    pub async fn set_status(&self, status: TaskStatus) -> ClientResult<Task> {
        let result = self.send_patch(&TaskPatch::status(status)).await;
        self.settle("status", result)
    }

    /// The server picks the assignee; nothing is guessed locally.
    pub async fn auto_assign(&self) -> ClientResult<Task> {
        let result = async {
            let token = self.queries.write_token()?;
            self.queries
                .source()
                .auto_assign(token.as_deref(), &self.task_id())
                .await
        }
        .await;
        self.settle("auto-assign", result)
    }

    pub async fn edit_fields(&self, patch: TaskPatch) -> ClientResult<Task> {
        let result = match validate_edit(&patch) {
            Ok(()) => self.send_patch(&patch).await,
            Err(error) => Err(error),
        };
        self.settle("edit", result)
    }

    /// Appends `url` and sends the whole resulting list, since the backend
    /// replaces the field rather than appending to it. Two clients appending
    /// at once can lose one of the attachments.
    pub async fn add_attachment(&self, url: &str) -> ClientResult<Task> {
        let url = url.trim();
        let result = if url.is_empty() {
            Err(ClientError::validation("attachment URL must not be empty"))
        } else {
            let mut attachments = self.view.borrow().task.attachments.clone();
            attachments.push(url.to_string());
            self.send_patch(&TaskPatch::attachments(attachments)).await
        };
        self.settle("attachment", result)
    }

    /// Uploads the file through a signed URL, then attaches its public URL.
    pub async fn upload_attachment(&self, path: &Path) -> ClientResult<Task> {
        let uploaded = async {
            let token = self.queries.write_token()?;
            upload_path(self.queries.source().as_ref(), token.as_deref(), path).await
        }
        .await;

        match uploaded {
            Ok(url) => self.add_attachment(&url).await,
            Err(error) => self.settle("attachment", Err(error)),
        }
    }

    async fn send_patch(&self, patch: &TaskPatch) -> ClientResult<Task> {
        let token = self.queries.write_token()?;
        self.queries
            .source()
            .update_task(token.as_deref(), &self.task_id(), patch)
            .await
    }

    fn settle(&self, action: &'static str, result: ClientResult<Task>) -> ClientResult<Task> {
        match result {
            Ok(task) => {
                tracing::info!(task_id = %task.id, action, status = task.status.as_str(), "task updated");
                self.view.send_modify(|view| {
                    view.task = task.clone();
                    view.last_error = None;
                });
                self.queries.invalidate_tasks();
                Ok(task)
            }
            Err(error) => {
                tracing::warn!(task_id = %self.task_id(), action, error = %error, "task update failed");
                self.view
                    .send_modify(|view| view.last_error = Some(error.to_string()));
                Err(error)
            }
        }
    }
}

/// Inline edits may touch title, description, priority, deadline, assignee
/// and complexity only.
fn validate_edit(patch: &TaskPatch) -> ClientResult<()> {
    if patch.status.is_some() || patch.attachments.is_some() {
        return Err(ClientError::validation(
            "status and attachments have their own actions",
        ));
    }
    if patch.is_empty() {
        return Err(ClientError::validation("nothing to update"));
    }
    if patch
        .title
        .as_deref()
        .is_some_and(|title| title.trim().is_empty())
    {
        return Err(ClientError::validation("title must not be empty"));
    }
    if let Some(priority) = patch.priority {
        if !(1..=5).contains(&priority) {
            return Err(ClientError::validation(format!(
                "priority must be between 1 and 5, got {priority}"
            )));
        }
    }
    if let Some(deadline) = patch.deadline.as_deref() {
        NaiveDate::parse_from_str(deadline, "%Y-%m-%d").map_err(|_| {
            ClientError::validation(format!("deadline must be a YYYY-MM-DD date, got '{deadline}'"))
        })?;
    }
    Ok(())
}
