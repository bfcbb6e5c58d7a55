//! Data access strategy.
//!
//! Every read and write goes through a [`DataSource`]. The network-backed
//! [`http::HttpSource`] and the fixture-backed [`fixtures::FixtureSource`] are
//! interchangeable; one is chosen at startup and injected everywhere else.

pub mod fixtures;
pub mod http;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ClientResult;
use crate::models::{
    ChatSummary, FlowchartPrediction, InviteRequest, Meeting, MeetingContext,
    MeetingSuggestion, Message, NewMeeting, NewMessage, NewTask, NewUpdate, ProfilePatch, Task,
    TaskFilters, TaskPatch, Update, UserProfile, WorkloadInsight,
};

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Whether calls need a bearer token. Queries stay idle without one.
    fn requires_auth(&self) -> bool;

    async fn current_profile(&self, token: Option<&str>) -> ClientResult<UserProfile>;

    async fn update_profile(
        &self,
        token: Option<&str>,
        patch: &ProfilePatch,
    ) -> ClientResult<UserProfile>;

    async fn update_member(
        &self,
        token: Option<&str>,
        user_id: &str,
        patch: &ProfilePatch,
    ) -> ClientResult<UserProfile>;

    async fn invite_member(&self, token: Option<&str>, invite: &InviteRequest)
        -> ClientResult<Value>;

    async fn list_profiles(&self, token: Option<&str>) -> ClientResult<Vec<UserProfile>>;

    async fn list_tasks(&self, token: Option<&str>, filters: &TaskFilters)
        -> ClientResult<Vec<Task>>;

    async fn create_task(&self, token: Option<&str>, task: &NewTask) -> ClientResult<Task>;

    async fn update_task(
        &self,
        token: Option<&str>,
        task_id: &str,
        patch: &TaskPatch,
    ) -> ClientResult<Task>;

    async fn auto_assign(&self, token: Option<&str>, task_id: &str) -> ClientResult<Task>;

    async fn list_messages(&self, token: Option<&str>, task_id: &str)
        -> ClientResult<Vec<Message>>;

    async fn send_message(&self, token: Option<&str>, message: &NewMessage)
        -> ClientResult<Message>;

    async fn summarize_chat(&self, token: Option<&str>, task_id: &str)
        -> ClientResult<ChatSummary>;

    async fn predict_flowchart(
        &self,
        token: Option<&str>,
        task: &Task,
    ) -> ClientResult<FlowchartPrediction>;

    async fn suggest_meeting(
        &self,
        token: Option<&str>,
        context: &MeetingContext,
    ) -> ClientResult<MeetingSuggestion>;

    async fn workload_insight(&self, token: Option<&str>) -> ClientResult<WorkloadInsight>;

    async fn list_meetings(&self, token: Option<&str>) -> ClientResult<Vec<Meeting>>;

    async fn create_meeting(&self, token: Option<&str>, meeting: &NewMeeting)
        -> ClientResult<Meeting>;

    async fn meeting_ics(&self, token: Option<&str>, meeting_id: &str) -> ClientResult<Vec<u8>>;

    async fn list_updates(&self, token: Option<&str>) -> ClientResult<Vec<Update>>;

    async fn post_update(&self, token: Option<&str>, update: &NewUpdate) -> ClientResult<Update>;

    /// Stores a file and returns the public URL to reference it by.
    async fn upload_file(
        &self,
        token: Option<&str>,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> ClientResult<String>;
}
