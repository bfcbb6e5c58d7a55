//! Offline data source over embedded JSON fixtures.
//!
//! Writes mutate an in-memory copy so a mock session behaves like a live one
//! until the process exits. Nothing is persisted.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::ics::render_ics;
use crate::models::{
    ActivityLogEntry, ChatSummary, Complexity, FlowchartPrediction, InviteRequest, Meeting,
    MeetingContext, MeetingSuggestion, Message, NewMeeting, NewMessage, NewTask, NewUpdate,
    OverloadedMember, ProfilePatch, Task, TaskFilters, TaskPatch, TaskStatus, Update,
    UserProfile, WorkloadInsight,
};
use crate::session::MOCK_USER_ID;
use crate::source::DataSource;
use crate::sync::lock_or_recover;

#[derive(RustEmbed)]
#[folder = "fixtures/"]
struct Fixtures;

fn load_fixture<T: DeserializeOwned>(name: &str) -> ClientResult<T> {
    let file = Fixtures::get(name)
        .ok_or_else(|| ClientError::Decode(format!("fixture '{name}' is not embedded")))?;
    serde_json::from_slice(&file.data).map_err(|error| ClientError::Decode(format!("{name}: {error}")))
}

/// The fixture task list, shared with the test backend so both data paths
/// start from the same rows.
pub fn seed_tasks() -> ClientResult<Vec<Task>> {
    load_fixture("tasks.json")
}

pub fn seed_profiles() -> ClientResult<Vec<UserProfile>> {
    load_fixture("users.json")
}

fn not_found(kind: &str, id: &str) -> ClientError {
    ClientError::Http {
        status: 404,
        message: format!("{kind} '{id}' not found"),
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn predicted_hours(complexity: Complexity) -> f64 {
    match complexity {
        Complexity::Low => 4.0,
        Complexity::Medium => 8.0,
        Complexity::High => 16.0,
    }
}

#[derive(Debug)]
struct FixtureStore {
    tasks: Vec<Task>,
    profiles: Vec<UserProfile>,
    meetings: Vec<Meeting>,
    updates: Vec<Update>,
    messages: Vec<Message>,
}

impl FixtureStore {
    fn task_mut(&mut self, task_id: &str) -> ClientResult<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or_else(|| not_found("task", task_id))
    }

    fn profile_mut(&mut self, user_id: &str) -> ClientResult<&mut UserProfile> {
        self.profiles
            .iter_mut()
            .find(|profile| profile.id == user_id)
            .ok_or_else(|| not_found("user", user_id))
    }
}

pub struct FixtureSource {
    store: Mutex<FixtureStore>,
    latency: Duration,
}

impl FixtureSource {
    /// Loads the embedded fixtures. `latency` delays task creation so the
    /// pending state of the create path stays observable offline.
    pub fn load(latency: Duration) -> ClientResult<Self> {
        let store = FixtureStore {
            tasks: seed_tasks()?,
            profiles: seed_profiles()?,
            meetings: load_fixture("meetings.json")?,
            updates: load_fixture("updates.json")?,
            messages: load_fixture("messages.json")?,
        };
        tracing::debug!(
            tasks = store.tasks.len(),
            profiles = store.profiles.len(),
            "fixtures loaded"
        );

        Ok(Self {
            store: Mutex::new(store),
            latency,
        })
    }
}

#[async_trait]
impl DataSource for FixtureSource {
    fn requires_auth(&self) -> bool {
        false
    }

    async fn current_profile(&self, _token: Option<&str>) -> ClientResult<UserProfile> {
        let mut store = lock_or_recover(&self.store);
        Ok(store.profile_mut(MOCK_USER_ID)?.clone())
    }

    async fn update_profile(
        &self,
        _token: Option<&str>,
        patch: &ProfilePatch,
    ) -> ClientResult<UserProfile> {
        let mut store = lock_or_recover(&self.store);
        let profile = store.profile_mut(MOCK_USER_ID)?;
        patch.apply_to(profile);
        Ok(profile.clone())
    }

    async fn update_member(
        &self,
        _token: Option<&str>,
        user_id: &str,
        patch: &ProfilePatch,
    ) -> ClientResult<UserProfile> {
        let mut store = lock_or_recover(&self.store);
        let profile = store.profile_mut(user_id)?;
        patch.apply_to(profile);
        Ok(profile.clone())
    }

    async fn invite_member(
        &self,
        _token: Option<&str>,
        invite: &InviteRequest,
    ) -> ClientResult<Value> {
        let mut store = lock_or_recover(&self.store);
        if store
            .profiles
            .iter()
            .any(|profile| profile.email.as_deref() == Some(invite.email.as_str()))
        {
            return Err(ClientError::Http {
                status: 409,
                message: format!("{} is already a member", invite.email),
            });
        }

        let user_id = Uuid::new_v4().to_string();
        let profile: UserProfile = serde_json::from_value(json!({
            "id": user_id,
            "name": invite.name,
            "email": invite.email,
            "role": invite.role,
        }))?;
        store.profiles.push(profile);

        Ok(json!({ "status": "invited", "user_id": user_id }))
    }

    async fn list_profiles(&self, _token: Option<&str>) -> ClientResult<Vec<UserProfile>> {
        Ok(lock_or_recover(&self.store).profiles.clone())
    }

    async fn list_tasks(
        &self,
        _token: Option<&str>,
        filters: &TaskFilters,
    ) -> ClientResult<Vec<Task>> {
        let store = lock_or_recover(&self.store);
        Ok(store
            .tasks
            .iter()
            .filter(|task| filters.matches(task))
            .cloned()
            .collect())
    }

    async fn create_task(&self, _token: Option<&str>, new_task: &NewTask) -> ClientResult<Task> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let created_at = now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: new_task.title.clone(),
            description: new_task.description.clone(),
            status: TaskStatus::Open,
            priority: new_task.priority,
            complexity: new_task.complexity,
            deadline: None,
            predicted_hours: None,
            assigned_to: None,
            created_by: Some(MOCK_USER_ID.to_string()),
            flowchart_step: None,
            tags: new_task.tags.clone(),
            attachments: new_task.attachments.clone(),
            watchers: Vec::new(),
            activity_log: Vec::new(),
            customer_name: new_task.customer_name.clone(),
            project_name: new_task.project_name.clone(),
            prd_url: new_task.prd_url.clone(),
            ai_reason: None,
            meeting_suggestion: None,
            created_at: Some(created_at.clone()),
            updated_at: Some(created_at),
        };

        lock_or_recover(&self.store).tasks.push(task.clone());
        tracing::info!(task_id = %task.id, "mock task created");
        Ok(task)
    }

    async fn update_task(
        &self,
        _token: Option<&str>,
        task_id: &str,
        patch: &TaskPatch,
    ) -> ClientResult<Task> {
        let mut store = lock_or_recover(&self.store);
        let task = store.task_mut(task_id)?;
        patch.apply_to(task);
        task.updated_at = Some(now());
        Ok(task.clone())
    }

    async fn auto_assign(&self, _token: Option<&str>, task_id: &str) -> ClientResult<Task> {
        let mut store = lock_or_recover(&self.store);
        let assignee = store
            .profiles
            .iter()
            .filter(|profile| profile.id != MOCK_USER_ID)
            .min_by(|left, right| left.utilization().total_cmp(&right.utilization()))
            .map(|profile| (profile.id.clone(), profile.name.clone()))
            .ok_or_else(|| ClientError::validation("no team members to assign"))?;

        let task = store.task_mut(task_id)?;
        let hours = predicted_hours(task.complexity);
        let timestamp = now();
        task.assigned_to = Some(assignee.0.clone());
        task.predicted_hours = Some(hours);
        task.ai_reason = Some(format!("{} has the most spare capacity", assignee.1));
        task.activity_log.push(ActivityLogEntry {
            timestamp: timestamp.clone(),
            actor: "assistant".to_string(),
            action: format!("auto-assigned to {}", assignee.1),
        });
        task.updated_at = Some(timestamp);
        let task = task.clone();

        if let Ok(profile) = store.profile_mut(&assignee.0) {
            profile.assigned_hours += hours;
        }
        Ok(task)
    }

    async fn list_messages(
        &self,
        _token: Option<&str>,
        task_id: &str,
    ) -> ClientResult<Vec<Message>> {
        let store = lock_or_recover(&self.store);
        Ok(store
            .messages
            .iter()
            .filter(|message| message.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        _token: Option<&str>,
        message: &NewMessage,
    ) -> ClientResult<Message> {
        let stored = Message {
            id: Uuid::new_v4().to_string(),
            task_id: message.task_id.clone(),
            sender_id: MOCK_USER_ID.to_string(),
            text: message.text.clone(),
            attachments: message.attachments.clone(),
            created_at: now(),
        };
        lock_or_recover(&self.store).messages.push(stored.clone());
        Ok(stored)
    }

    async fn summarize_chat(
        &self,
        _token: Option<&str>,
        task_id: &str,
    ) -> ClientResult<ChatSummary> {
        let store = lock_or_recover(&self.store);
        let texts: Vec<String> = store
            .messages
            .iter()
            .filter(|message| message.task_id == task_id)
            .map(|message| message.text.clone())
            .collect();

        Ok(ChatSummary {
            status: format!("{} messages in this thread", texts.len()),
            bullets: texts.into_iter().rev().take(3).collect(),
            next_step: None,
        })
    }

    async fn predict_flowchart(
        &self,
        _token: Option<&str>,
        task: &Task,
    ) -> ClientResult<FlowchartPrediction> {
        let (step, action) = match task.status {
            TaskStatus::Open => ("Planning", "Pick an owner and confirm the estimate"),
            TaskStatus::InProgress => ("Development", "Share a progress update in chat"),
            TaskStatus::InReview => ("Review", "Request a reviewer and address feedback"),
            TaskStatus::Blocked => ("Escalation", "Schedule a meeting to remove the blocker"),
            TaskStatus::Completed => ("Done", "Archive attachments and close the thread"),
        };
        Ok(FlowchartPrediction {
            flowchart_next_step: step.to_string(),
            recommended_action: action.to_string(),
        })
    }

    async fn suggest_meeting(
        &self,
        _token: Option<&str>,
        context: &MeetingContext,
    ) -> ClientResult<MeetingSuggestion> {
        let day = if context.preferred_day.trim().is_empty() {
            "Tuesday".to_string()
        } else {
            context.preferred_day.clone()
        };
        Ok(MeetingSuggestion {
            attendees: context.attendees.clone(),
            duration: if context.attendees.len() > 3 { 45 } else { 30 },
            day,
            reason: Some("Everyone listed is free in the morning".to_string()),
        })
    }

    async fn workload_insight(&self, _token: Option<&str>) -> ClientResult<WorkloadInsight> {
        let store = lock_or_recover(&self.store);
        let overloaded: Vec<OverloadedMember> = store
            .profiles
            .iter()
            .filter(|profile| profile.utilization() > 1.0)
            .map(|profile| OverloadedMember {
                name: Some(profile.name.clone()),
                utilization: profile.utilization(),
            })
            .collect();
        let suggestions = overloaded
            .iter()
            .filter_map(|member| member.name.as_ref())
            .map(|name| format!("Move one task away from {name}"))
            .collect();

        Ok(WorkloadInsight {
            overloaded,
            suggestions,
        })
    }

    async fn list_meetings(&self, _token: Option<&str>) -> ClientResult<Vec<Meeting>> {
        Ok(lock_or_recover(&self.store).meetings.clone())
    }

    async fn create_meeting(
        &self,
        _token: Option<&str>,
        meeting: &NewMeeting,
    ) -> ClientResult<Meeting> {
        let stored = Meeting {
            id: Uuid::new_v4().to_string(),
            title: meeting.title.clone(),
            description: Some(meeting.description.clone()),
            attendees: meeting.attendees.clone(),
            date: meeting.date.clone(),
            duration_minutes: meeting.duration_minutes,
            task_id: meeting.task_id.clone(),
            created_by: MOCK_USER_ID.to_string(),
            meet_url: meeting.meet_url.clone(),
        };
        lock_or_recover(&self.store).meetings.push(stored.clone());
        Ok(stored)
    }

    async fn meeting_ics(&self, _token: Option<&str>, meeting_id: &str) -> ClientResult<Vec<u8>> {
        let meeting = lock_or_recover(&self.store)
            .meetings
            .iter()
            .find(|meeting| meeting.id == meeting_id)
            .cloned()
            .ok_or_else(|| not_found("meeting", meeting_id))?;
        Ok(render_ics(&meeting)?.into_bytes())
    }

    async fn list_updates(&self, _token: Option<&str>) -> ClientResult<Vec<Update>> {
        Ok(lock_or_recover(&self.store).updates.clone())
    }

    async fn post_update(&self, _token: Option<&str>, update: &NewUpdate) -> ClientResult<Update> {
        let mut store = lock_or_recover(&self.store);
        let user_name = store
            .profiles
            .iter()
            .find(|profile| profile.id == MOCK_USER_ID)
            .map(|profile| profile.name.clone());
        let stored = Update {
            id: Uuid::new_v4().to_string(),
            user_id: MOCK_USER_ID.to_string(),
            user_name,
            priority: update.priority,
            message: update.message.clone(),
            task_id: update.task_id.clone(),
            created_at: Some(now()),
        };
        // Newest first, as the backend lists them.
        store.updates.insert(0, stored.clone());
        Ok(stored)
    }

    async fn upload_file(
        &self,
        _token: Option<&str>,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> ClientResult<String> {
        tracing::info!(filename, content_type, size = bytes.len(), "mock upload, bytes discarded");
        Ok(format!("mock://uploads/{}/{filename}", Uuid::new_v4()))
    }
}
