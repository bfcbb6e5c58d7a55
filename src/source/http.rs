use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use crate::api::client::{ApiClient, RequestOptions};
use crate::api::upload::signed_upload;
use crate::error::ClientResult;
use crate::models::{
    ChatSummary, FlowchartPrediction, InviteRequest, Meeting, MeetingContext,
    MeetingSuggestion, Message, NewMeeting, NewMessage, NewTask, NewUpdate, ProfilePatch, Task,
    TaskFilters, TaskPatch, Update, UserProfile, WorkloadInsight,
};
use crate::source::DataSource;

/// Live data source talking to the ops backend.
#[derive(Clone, Debug)]
pub struct HttpSource {
    client: ApiClient,
}

impl HttpSource {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

/// `/tasks/` with the filters as query parameters.
pub fn task_list_path(filters: &TaskFilters) -> String {
    let query = filters
        .query_pairs()
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    if query.is_empty() {
        "/tasks/".to_string()
    } else {
        format!("/tasks/?{query}")
    }
}

#[async_trait]
impl DataSource for HttpSource {
    fn requires_auth(&self) -> bool {
        true
    }

    async fn current_profile(&self, token: Option<&str>) -> ClientResult<UserProfile> {
        self.client.get("/users/me", token).await
    }

    async fn update_profile(
        &self,
        token: Option<&str>,
        patch: &ProfilePatch,
    ) -> ClientResult<UserProfile> {
        self.client
            .send_json(Method::PATCH, "/users/me", patch, token)
            .await
    }

    async fn update_member(
        &self,
        token: Option<&str>,
        user_id: &str,
        patch: &ProfilePatch,
    ) -> ClientResult<UserProfile> {
        self.client
            .send_json(Method::PATCH, &format!("/users/{user_id}"), patch, token)
            .await
    }

    async fn invite_member(
        &self,
        token: Option<&str>,
        invite: &InviteRequest,
    ) -> ClientResult<Value> {
        self.client
            .send_json(Method::POST, "/users/invite", invite, token)
            .await
    }

    async fn list_profiles(&self, token: Option<&str>) -> ClientResult<Vec<UserProfile>> {
        self.client.get("/users", token).await
    }

    async fn list_tasks(
        &self,
        token: Option<&str>,
        filters: &TaskFilters,
    ) -> ClientResult<Vec<Task>> {
        self.client.get(&task_list_path(filters), token).await
    }

    async fn create_task(&self, token: Option<&str>, task: &NewTask) -> ClientResult<Task> {
        self.client
            .send_json(Method::POST, "/tasks/", task, token)
            .await
    }

    async fn update_task(
        &self,
        token: Option<&str>,
        task_id: &str,
        patch: &TaskPatch,
    ) -> ClientResult<Task> {
        self.client
            .send_json(Method::PATCH, &format!("/tasks/{task_id}"), patch, token)
            .await
    }

    async fn auto_assign(&self, token: Option<&str>, task_id: &str) -> ClientResult<Task> {
        self.client
            .request(
                Method::POST,
                &format!("/tasks/{task_id}/auto-assign"),
                RequestOptions::new().token(token),
            )
            .await
    }

    async fn list_messages(
        &self,
        token: Option<&str>,
        task_id: &str,
    ) -> ClientResult<Vec<Message>> {
        self.client
            .get(&format!("/messages/{task_id}"), token)
            .await
    }

    async fn send_message(
        &self,
        token: Option<&str>,
        message: &NewMessage,
    ) -> ClientResult<Message> {
        self.client
            .send_json(Method::POST, "/messages/", message, token)
            .await
    }

    async fn summarize_chat(
        &self,
        token: Option<&str>,
        task_id: &str,
    ) -> ClientResult<ChatSummary> {
        self.client
            .request(
                Method::POST,
                &format!("/messages/{task_id}/summarize"),
                RequestOptions::new().token(token),
            )
            .await
    }

    async fn predict_flowchart(
        &self,
        token: Option<&str>,
        task: &Task,
    ) -> ClientResult<FlowchartPrediction> {
        self.client
            .send_json(Method::POST, "/agent/flowchart", &json!({ "task": task }), token)
            .await
    }

    async fn suggest_meeting(
        &self,
        token: Option<&str>,
        context: &MeetingContext,
    ) -> ClientResult<MeetingSuggestion> {
        self.client
            .send_json(
                Method::POST,
                "/agent/meeting-suggestion",
                &json!({ "context": context }),
                token,
            )
            .await
    }

    async fn workload_insight(&self, token: Option<&str>) -> ClientResult<WorkloadInsight> {
        self.client.get("/agent/who-is-overloaded", token).await
    }

    async fn list_meetings(&self, token: Option<&str>) -> ClientResult<Vec<Meeting>> {
        self.client.get("/meetings", token).await
    }

    async fn create_meeting(
        &self,
        token: Option<&str>,
        meeting: &NewMeeting,
    ) -> ClientResult<Meeting> {
        self.client
            .send_json(Method::POST, "/meetings/", meeting, token)
            .await
    }

    async fn meeting_ics(&self, token: Option<&str>, meeting_id: &str) -> ClientResult<Vec<u8>> {
        self.client
            .get_bytes(&format!("/meetings/{meeting_id}/ics"), token)
            .await
    }

    async fn list_updates(&self, token: Option<&str>) -> ClientResult<Vec<Update>> {
        self.client.get("/updates", token).await
    }

    async fn post_update(&self, token: Option<&str>, update: &NewUpdate) -> ClientResult<Update> {
        self.client
            .send_json(Method::POST, "/updates", update, token)
            .await
    }

    async fn upload_file(
        &self,
        token: Option<&str>,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> ClientResult<String> {
        signed_upload(&self.client, token, filename, content_type, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use super::*;
    use crate::models::TaskStatus;
    use crate::source::fixtures::FixtureSource;
    use crate::test_support::{spawn_stub_backend, test_client};

    #[test]
    fn task_list_path_encodes_filters_as_query() {
        assert_eq!(task_list_path(&TaskFilters::default()), "/tasks/");
        assert_eq!(
            task_list_path(&TaskFilters {
                status: Some(TaskStatus::InReview),
                priority: Some(2),
            }),
            "/tasks/?status=in_review&priority=2"
        );
        assert_eq!(
            task_list_path(&TaskFilters {
                status: None,
                priority: Some(5),
            }),
            "/tasks/?priority=5"
        );
    }

    #[tokio::test]
    async fn live_and_mock_filtering_select_the_same_tasks() {
        let backend = spawn_stub_backend().await;
        let live = HttpSource::new(test_client(&backend.base_url));
        let mock = FixtureSource::load(Duration::ZERO).expect("fixtures should load");

        let statuses = std::iter::once(None).chain(TaskStatus::ALL.into_iter().map(Some));
        for status in statuses {
            for priority in [None, Some(1), Some(2), Some(3), Some(4), Some(5)] {
                let filters = TaskFilters { status, priority };
                let live_ids: BTreeSet<String> = live
                    .list_tasks(Some("tok-1"), &filters)
                    .await
                    .expect("live listing should work")
                    .into_iter()
                    .map(|task| task.id)
                    .collect();
                let mock_ids: BTreeSet<String> = mock
                    .list_tasks(None, &filters)
                    .await
                    .expect("mock listing should work")
                    .into_iter()
                    .map(|task| task.id)
                    .collect();
                assert_eq!(live_ids, mock_ids, "filters {filters:?} diverged");
            }
        }

        backend.abort();
    }

    #[tokio::test]
    async fn auto_assign_returns_server_assignment() {
        let backend = spawn_stub_backend().await;
        let live = HttpSource::new(test_client(&backend.base_url));

        let task = live
            .auto_assign(Some("tok-1"), "task-101")
            .await
            .expect("auto-assign should work");
        assert_eq!(task.assigned_to.as_deref(), Some("u-ada"));
        assert_eq!(task.predicted_hours, Some(6.5));

        backend.abort();
    }
}
