//! Profile, invite, onboarding, calendar and team-update operations, plus the
//! derived views the dashboard shows.
//!
//! Every write goes through the active data source with the session token and
//! marks the affected resource cache stale once the server confirms.

use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{NaiveDate, SecondsFormat};
use regex::Regex;

use crate::api::upload::upload_path;
use crate::error::{ClientError, ClientResult};
use crate::ics::parse_meeting_time;
use crate::models::{
    split_list, InviteRequest, Meeting, MeetingContext, NewMeeting, NewUpdate, ProfilePatch,
    Update, UpdatePriority, UserProfile,
};
use crate::queries::Queries;

pub const DEFAULT_INVITE_ROLE: &str = "employee";
pub const DEFAULT_MEETING_MINUTES: u32 = 30;
pub const MEETING_SUGGESTION_UNAVAILABLE: &str = "Meeting suggestion unavailable right now.";
pub const WORKLOAD_INSIGHT_UNAVAILABLE: &str = "Workload insight unavailable right now.";

const NOTIFICATION_LIMIT: usize = 3;
const OVERLOAD_LINE_LIMIT: usize = 3;

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));

/// Re-reads the signed-in profile after a write to it. In mock mode there may
/// be no session yet, which is fine.
async fn sync_session_profile(queries: &Queries) {
    if let Err(error) = queries.session().refresh_profile().await {
        tracing::debug!(error = %error, "session profile not refreshed");
    }
}

pub async fn update_own_profile(queries: &Queries, patch: &ProfilePatch) -> ClientResult<UserProfile> {
    if patch.is_empty() {
        return Err(ClientError::validation("nothing to update"));
    }
    if patch.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
        return Err(ClientError::validation("name must not be empty"));
    }
    let token = queries.write_token()?;
    let profile = queries
        .source()
        .update_profile(token.as_deref(), patch)
        .await?;
    tracing::info!(user_id = %profile.id, "profile updated");

    sync_session_profile(queries).await;
    queries.invalidate_employees();
    Ok(profile)
}

/// Admin edit of another member's profile.
pub async fn update_member(
    queries: &Queries,
    user_id: &str,
    patch: &ProfilePatch,
) -> ClientResult<UserProfile> {
    if patch.is_empty() {
        return Err(ClientError::validation("nothing to update"));
    }
    let token = queries.write_token()?;
    let profile = queries
        .source()
        .update_member(token.as_deref(), user_id, patch)
        .await?;
    tracing::info!(user_id, "member updated");
    queries.invalidate_employees();
    Ok(profile)
}

/// Display name for an invitee: the local part of their address.
pub fn name_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or_default().to_string()
}

pub async fn invite_member(queries: &Queries, email: &str, role: &str) -> ClientResult<InviteRequest> {
    let email = email.trim();
    if !EMAIL.is_match(email) {
        return Err(ClientError::validation(format!("'{email}' is not an email address")));
    }
    let role = match role.trim() {
        "" => DEFAULT_INVITE_ROLE,
        role => role,
    };
    let invite = InviteRequest {
        email: email.to_string(),
        role: role.to_string(),
        name: name_from_email(email),
    };

    let token = queries.write_token()?;
    queries
        .source()
        .invite_member(token.as_deref(), &invite)
        .await?;
    tracing::info!(email = %invite.email, role = %invite.role, "member invited");
    queries.invalidate_employees();
    Ok(invite)
}

/// Whether the onboarding form should be shown. Stays false while the
/// profile has not been loaded.
pub fn needs_onboarding(queries: &Queries) -> bool {
    queries.session().snapshot().needs_onboarding()
}

#[derive(Debug, Clone, Default)]
pub struct Onboarding {
    pub role: String,
    /// Comma-separated, as entered.
    pub skills: String,
    pub availability: Option<String>,
    pub capacity_hours: Option<f64>,
    pub resume_file: Option<PathBuf>,
    pub resume_url: Option<String>,
    pub avatar_file: Option<PathBuf>,
}

/// Uploads the resume (and avatar) if given as files, then writes the
/// onboarding fields to the signed-in profile.
pub async fn complete_onboarding(queries: &Queries, form: &Onboarding) -> ClientResult<UserProfile> {
    let role = form.role.trim();
    if role.is_empty() {
        return Err(ClientError::validation("role is required"));
    }
    if form.capacity_hours.is_some_and(|hours| hours <= 0.0) {
        return Err(ClientError::validation("capacity must be positive"));
    }
    let token = queries.write_token()?;
    let source = queries.source().as_ref();

    let resume_url = match &form.resume_file {
        Some(path) => Some(upload_path(source, token.as_deref(), path).await?),
        None => form
            .resume_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(ToOwned::to_owned),
    };
    if resume_url.is_none() {
        return Err(ClientError::validation("a resume file or URL is required"));
    }
    let avatar_url = match &form.avatar_file {
        Some(path) => Some(upload_path(source, token.as_deref(), path).await?),
        None => None,
    };

    let patch = ProfilePatch {
        role: Some(role.to_string()),
        skills: Some(split_list(&form.skills)),
        availability: form.availability.clone(),
        capacity_hours: form.capacity_hours,
        avatar_url,
        resume_url,
        ..ProfilePatch::default()
    };
    update_own_profile(queries, &patch).await
}

#[derive(Debug, Clone)]
pub struct MeetingDraft {
    pub title: String,
    pub description: String,
    /// Comma-separated, as entered.
    pub attendees: String,
    pub date: String,
    pub duration_minutes: u32,
    pub task_id: Option<String>,
    pub meet_url: Option<String>,
}

impl Default for MeetingDraft {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            attendees: String::new(),
            date: String::new(),
            duration_minutes: DEFAULT_MEETING_MINUTES,
            task_id: None,
            meet_url: None,
        }
    }
}

impl MeetingDraft {
    /// The create payload. The date is normalized to an RFC 3339 UTC
    /// timestamp.
    pub fn to_new_meeting(&self) -> ClientResult<NewMeeting> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ClientError::validation("title must not be empty"));
        }
        let start = parse_meeting_time(&self.date).ok_or_else(|| {
            ClientError::validation(format!("'{}' is not an ISO date and time", self.date))
        })?;
        if self.duration_minutes == 0 {
            return Err(ClientError::validation("duration must be positive"));
        }

        Ok(NewMeeting {
            title: title.to_string(),
            description: self.description.trim().to_string(),
            attendees: split_list(&self.attendees),
            date: start.to_rfc3339_opts(SecondsFormat::Secs, true),
            duration_minutes: self.duration_minutes,
            task_id: self.task_id.clone(),
            meet_url: self.meet_url.clone(),
        })
    }
}

pub async fn schedule_meeting(queries: &Queries, draft: &MeetingDraft) -> ClientResult<Meeting> {
    let meeting = draft.to_new_meeting()?;
    let token = queries.write_token()?;
    let created = queries
        .source()
        .create_meeting(token.as_deref(), &meeting)
        .await?;
    tracing::info!(meeting_id = %created.id, date = %created.date, "meeting scheduled");
    queries.invalidate_meetings();
    Ok(created)
}

/// Meetings starting on `day` (UTC), earliest first. Meetings with an
/// unreadable date are left out.
pub fn meetings_on(meetings: &[Meeting], day: NaiveDate) -> Vec<Meeting> {
    let mut dated: Vec<_> = meetings
        .iter()
        .filter_map(|meeting| parse_meeting_time(&meeting.date).map(|start| (start, meeting)))
        .filter(|(start, _)| start.date_naive() == day)
        .collect();
    dated.sort_by_key(|(start, _)| *start);
    dated.into_iter().map(|(_, meeting)| meeting.clone()).collect()
}

/// Calendar file for one meeting, as served.
pub async fn export_ics(queries: &Queries, meeting_id: &str) -> ClientResult<Vec<u8>> {
    let token = queries.write_token()?;
    queries
        .source()
        .meeting_ics(token.as_deref(), meeting_id)
        .await
}

/// One-line scheduling hint for the meeting form. Failures degrade to a
/// placeholder.
pub async fn suggest_meeting(queries: &Queries, context: &MeetingContext) -> String {
    let suggestion = async {
        let token = queries.write_token()?;
        queries
            .source()
            .suggest_meeting(token.as_deref(), context)
            .await
    }
    .await;

    match suggestion {
        Ok(suggestion) => format!(
            "AI suggests {} for {} mins with {}",
            suggestion.day,
            suggestion.duration,
            suggestion.attendees.join(", ")
        ),
        Err(error) => {
            tracing::warn!(error = %error, "meeting suggestion unavailable");
            MEETING_SUGGESTION_UNAVAILABLE.to_string()
        }
    }
}

pub async fn post_update(
    queries: &Queries,
    priority: UpdatePriority,
    message: &str,
    task_id: Option<String>,
) -> ClientResult<Update> {
    let message = message.trim();
    if message.is_empty() {
        return Err(ClientError::validation("update must not be empty"));
    }
    let token = queries.write_token()?;
    let posted = queries
        .source()
        .post_update(
            token.as_deref(),
            &NewUpdate {
                priority,
                message: message.to_string(),
                task_id,
            },
        )
        .await?;
    tracing::info!(update_id = %posted.id, "update posted");
    queries.invalidate_updates();
    Ok(posted)
}

/// The first few high-priority updates, in the order the server listed them.
pub fn notifications(updates: &[Update]) -> Vec<Update> {
    updates
        .iter()
        .filter(|update| update.priority == UpdatePriority::High)
        .take(NOTIFICATION_LIMIT)
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadRow {
    pub user_id: String,
    pub name: String,
    pub percent: u32,
    pub overloaded: bool,
}

pub fn workload(profiles: &[UserProfile]) -> Vec<WorkloadRow> {
    profiles
        .iter()
        .map(|profile| WorkloadRow {
            user_id: profile.id.clone(),
            name: profile.name.clone(),
            percent: profile.workload_percent(),
            overloaded: profile.utilization() > 1.0,
        })
        .collect()
}

/// Lines for the "who is overloaded" panel: up to three overloaded members,
/// then the backend's suggestions. Failures degrade to a placeholder line.
pub async fn overload_summary(queries: &Queries) -> Vec<String> {
    let insight = async {
        let token = queries.write_token()?;
        queries.source().workload_insight(token.as_deref()).await
    }
    .await;

    match insight {
        Ok(insight) => insight
            .overloaded
            .iter()
            .take(OVERLOAD_LINE_LIMIT)
            .map(|member| {
                format!(
                    "{} at {:.0}% load",
                    member.name.as_deref().unwrap_or("Member"),
                    member.utilization * 100.0
                )
            })
            .chain(insight.suggestions)
            .collect(),
        Err(error) => {
            tracing::warn!(error = %error, "workload insight unavailable");
            vec![WORKLOAD_INSIGHT_UNAVAILABLE.to_string()]
        }
    }
}
