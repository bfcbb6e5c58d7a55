use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    InReview,
    Blocked,
    Completed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Open,
        TaskStatus::InProgress,
        TaskStatus::InReview,
        TaskStatus::Blocked,
        TaskStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::InReview => "in_review",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "In Progress",
            Self::InReview => "In Review",
            Self::Blocked => "Blocked",
            Self::Completed => "Completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value.trim())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub timestamp: String,
    pub actor: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingSuggestion {
    #[serde(default)]
    pub attendees: Vec<String>,
    pub duration: u32,
    pub day: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub predicted_hours: Option<f64>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub flowchart_step: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub watchers: Vec<String>,
    #[serde(default)]
    pub activity_log: Vec<ActivityLogEntry>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub prd_url: Option<String>,
    #[serde(default)]
    pub ai_reason: Option<String>,
    #[serde(default)]
    pub meeting_suggestion: Option<MeetingSuggestion>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    #[default]
    Active,
    Busy,
    OnLeave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default = "default_capacity_hours")]
    pub capacity_hours: f64,
    #[serde(default)]
    pub assigned_hours: f64,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub resume_url: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub status: MemberStatus,
    #[serde(default)]
    pub availability: Option<String>,
}

fn default_capacity_hours() -> f64 {
    40.0
}

impl UserProfile {
    /// Assigned hours over capacity. Values above 1.0 mean over-allocation.
    pub fn utilization(&self) -> f64 {
        self.assigned_hours / self.capacity_hours.max(1.0)
    }

    pub fn workload_percent(&self) -> u32 {
        (self.utilization() * 100.0).round().max(0.0) as u32
    }

    pub fn needs_onboarding(&self) -> bool {
        is_blank(self.role.as_deref()) || is_blank(self.resume_url.as_deref())
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |value| value.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub task_id: String,
    pub sender_id: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
    pub date: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub task_id: Option<String>,
    pub created_by: String,
    #[serde(default)]
    pub meet_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePriority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    pub priority: UpdatePriority,
    pub message: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Task list filters. Both filters must hold when both are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TaskFilters {
    pub status: Option<TaskStatus>,
    pub priority: Option<u8>,
}

impl TaskFilters {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if let Some(priority) = self.priority {
            pairs.push(("priority", priority.to_string()));
        }
        pairs
    }

    pub fn matches(&self, task: &Task) -> bool {
        let status_ok = self.status.map_or(true, |status| task.status == status);
        let priority_ok = self
            .priority
            .map_or(true, |priority| task.priority == Some(priority));
        status_ok && priority_ok
    }
}

/// Partial task update. Only present fields are serialized, and each present
/// field replaces the server value wholesale (attachments included).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<String>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn attachments(attachments: Vec<String>) -> Self {
        Self {
            attachments: Some(attachments),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = Some(description.clone());
        }
        if let Some(priority) = self.priority {
            task.priority = Some(priority);
        }
        if let Some(deadline) = &self.deadline {
            task.deadline = Some(deadline.clone());
        }
        if let Some(assigned_to) = &self.assigned_to {
            task.assigned_to = Some(assigned_to.clone());
        }
        if let Some(complexity) = self.complexity {
            task.complexity = complexity;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(attachments) = &self.attachments {
            task.attachments = attachments.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewTask {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub complexity: Complexity,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    pub attachments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prd_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MemberStatus>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, profile: &mut UserProfile) {
        if let Some(name) = &self.name {
            profile.name = name.clone();
        }
        if let Some(role) = &self.role {
            profile.role = Some(role.clone());
        }
        if let Some(skills) = &self.skills {
            profile.skills = skills.clone();
        }
        if let Some(capacity_hours) = self.capacity_hours {
            profile.capacity_hours = capacity_hours;
        }
        if let Some(assigned_hours) = self.assigned_hours {
            profile.assigned_hours = assigned_hours;
        }
        if let Some(availability) = &self.availability {
            profile.availability = Some(availability.clone());
        }
        if let Some(email) = &self.email {
            profile.email = Some(email.clone());
        }
        if let Some(avatar_url) = &self.avatar_url {
            profile.avatar_url = Some(avatar_url.clone());
        }
        if let Some(resume_url) = &self.resume_url {
            profile.resume_url = Some(resume_url.clone());
        }
        if let Some(phone) = &self.phone {
            profile.phone = Some(phone.clone());
        }
        if let Some(bio) = &self.bio {
            profile.bio = Some(bio.clone());
        }
        if let Some(status) = self.status {
            profile.status = status;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InviteRequest {
    pub email: String,
    pub role: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMeeting {
    pub title: String,
    pub description: String,
    pub attendees: Vec<String>,
    pub date: String,
    pub duration_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meet_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewUpdate {
    pub priority: UpdatePriority,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub task_id: String,
    pub text: String,
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedUploadRequest {
    pub filename: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignedUpload {
    pub upload_url: String,
    pub public_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatSummary {
    #[serde(default)]
    pub bullets: Vec<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub next_step: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FlowchartPrediction {
    pub flowchart_next_step: String,
    pub recommended_action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeetingContext {
    pub attendees: Vec<String>,
    pub preferred_day: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OverloadedMember {
    #[serde(default)]
    pub name: Option<String>,
    pub utilization: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WorkloadInsight {
    #[serde(default)]
    pub overloaded: Vec<OverloadedMember>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Splits a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
