use std::sync::Arc;

use crate::error::{ClientError, ClientResult};
use crate::models::{Meeting, NewTask, Task, TaskFilters, Update, UserProfile};
use crate::query::{QueryCache, QueryState};
use crate::session::Session;
use crate::source::DataSource;

/// One cache per backend resource, all reading through the same data source
/// with the session's current token.
pub struct Queries {
    source: Arc<dyn DataSource>,
    session: Session,
    tasks: QueryCache<TaskFilters, Vec<Task>>,
    employees: QueryCache<(), Vec<UserProfile>>,
    meetings: QueryCache<(), Vec<Meeting>>,
    updates: QueryCache<(), Vec<Update>>,
}

impl Queries {
    pub fn new(source: Arc<dyn DataSource>, session: Session) -> Self {
        Self {
            source,
            session,
            tasks: QueryCache::new("tasks"),
            employees: QueryCache::new("users"),
            meetings: QueryCache::new("meetings"),
            updates: QueryCache::new("updates"),
        }
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The token to read with, or `None` while queries are disabled.
    fn read_token(&self) -> Option<Option<String>> {
        let token = self.session.token();
        if self.source.requires_auth() && token.is_none() {
            return None;
        }
        Some(token)
    }

    /// The token to write with. Writes fail instead of idling.
    pub fn write_token(&self) -> ClientResult<Option<String>> {
        self.read_token().ok_or(ClientError::Unauthenticated)
    }

    pub async fn tasks(&self, filters: TaskFilters) -> QueryState<Vec<Task>> {
        let Some(token) = self.read_token() else {
            return QueryState::Idle;
        };
        let source = &self.source;
        self.tasks
            .fetch(filters, || async move {
                source.list_tasks(token.as_deref(), &filters).await
            })
            .await
    }

    pub async fn refetch_tasks(&self, filters: TaskFilters) -> QueryState<Vec<Task>> {
        let Some(token) = self.read_token() else {
            return QueryState::Idle;
        };
        let source = &self.source;
        self.tasks
            .refetch(filters, || async move {
                source.list_tasks(token.as_deref(), &filters).await
            })
            .await
    }

    pub fn invalidate_tasks(&self) {
        self.tasks.invalidate();
    }

    pub fn tasks_state(&self, filters: &TaskFilters) -> QueryState<Vec<Task>> {
        self.tasks.state(filters)
    }

    pub async fn employees(&self) -> QueryState<Vec<UserProfile>> {
        let Some(token) = self.read_token() else {
            return QueryState::Idle;
        };
        let source = &self.source;
        self.employees
            .fetch((), || async move { source.list_profiles(token.as_deref()).await })
            .await
    }

    pub async fn refetch_employees(&self) -> QueryState<Vec<UserProfile>> {
        let Some(token) = self.read_token() else {
            return QueryState::Idle;
        };
        let source = &self.source;
        self.employees
            .refetch((), || async move { source.list_profiles(token.as_deref()).await })
            .await
    }

    pub fn invalidate_employees(&self) {
        self.employees.invalidate();
    }

    pub async fn meetings(&self) -> QueryState<Vec<Meeting>> {
        let Some(token) = self.read_token() else {
            return QueryState::Idle;
        };
        let source = &self.source;
        self.meetings
            .fetch((), || async move { source.list_meetings(token.as_deref()).await })
            .await
    }

    pub async fn refetch_meetings(&self) -> QueryState<Vec<Meeting>> {
        let Some(token) = self.read_token() else {
            return QueryState::Idle;
        };
        let source = &self.source;
        self.meetings
            .refetch((), || async move { source.list_meetings(token.as_deref()).await })
            .await
    }

    pub fn invalidate_meetings(&self) {
        self.meetings.invalidate();
    }

    pub async fn updates(&self) -> QueryState<Vec<Update>> {
        let Some(token) = self.read_token() else {
            return QueryState::Idle;
        };
        let source = &self.source;
        self.updates
            .fetch((), || async move { source.list_updates(token.as_deref()).await })
            .await
    }

    pub async fn refetch_updates(&self) -> QueryState<Vec<Update>> {
        let Some(token) = self.read_token() else {
            return QueryState::Idle;
        };
        let source = &self.source;
        self.updates
            .refetch((), || async move { source.list_updates(token.as_deref()).await })
            .await
    }

    pub fn invalidate_updates(&self) {
        self.updates.invalidate();
    }

    /// Posts a new task and marks every task list stale.
    pub async fn create_task(&self, task: &NewTask) -> ClientResult<Task> {
        let token = self.write_token()?;
        let created = self.source.create_task(token.as_deref(), task).await?;
        tracing::info!(task_id = %created.id, title = %created.title, "task created");
        self.invalidate_tasks();
        Ok(created)
    }
}
