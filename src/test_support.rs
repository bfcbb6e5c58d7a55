//! In-process stub of the ops backend for tests.
//!
//! Routes mirror the live API closely enough to exercise the client:
//! bearer tokens are required and recorded, task filters use AND semantics,
//! and a few toggles force failures.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::api::client::ApiClient;
use crate::models::{Message, Task, UserProfile};
use crate::source::fixtures::{seed_profiles, seed_tasks};
use crate::sync::lock_or_recover;

pub const STUB_USER_ID: &str = "u-live";

/// Serves `router` on an ephemeral local port.
pub async fn spawn_router(router: Router) -> (String, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener
        .local_addr()
        .expect("listener address should be readable");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (format!("http://{addr}"), server)
}

pub fn test_client(base_url: &str) -> ApiClient {
    ApiClient::new(base_url, Duration::from_secs(5)).expect("client should build")
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct StubState {
    base_url: String,
    tasks: Vec<Task>,
    profiles: Vec<UserProfile>,
    messages: Vec<Message>,
    meetings: Vec<Value>,
    updates: Vec<Value>,
    uploads: Vec<StoredUpload>,
    last_token: Option<String>,
    fail_profile: bool,
    fail_task_patch: bool,
    next_patch_delay: Option<Duration>,
    fail_agent: bool,
    task_list_requests: usize,
    message_list_requests: usize,
}

type Shared = Arc<Mutex<StubState>>;
type StubResult<T> = Result<T, (StatusCode, String)>;

pub struct StubBackend {
    pub base_url: String,
    state: Shared,
    server: JoinHandle<()>,
}

impl StubBackend {
    pub fn fail_profile(&self, fail: bool) {
        lock_or_recover(&self.state).fail_profile = fail;
    }

    pub fn fail_task_patch(&self, fail: bool) {
        lock_or_recover(&self.state).fail_task_patch = fail;
    }

    /// Holds the next task patch for `delay` before handling it.
    pub fn delay_next_task_patch(&self, delay: Duration) {
        lock_or_recover(&self.state).next_patch_delay = Some(delay);
    }

    pub fn fail_agent(&self, fail: bool) {
        lock_or_recover(&self.state).fail_agent = fail;
    }

    pub fn last_token(&self) -> Option<String> {
        lock_or_recover(&self.state).last_token.clone()
    }

    pub fn uploads(&self) -> Vec<StoredUpload> {
        lock_or_recover(&self.state).uploads.clone()
    }

    pub fn task_list_requests(&self) -> usize {
        lock_or_recover(&self.state).task_list_requests
    }

    pub fn message_list_requests(&self) -> usize {
        lock_or_recover(&self.state).message_list_requests
    }

    /// Appends a message as if another participant had posted it.
    pub fn push_message(&self, task_id: &str, sender_id: &str, text: &str) {
        let mut state = lock_or_recover(&self.state);
        let id = format!("msg-{}", state.messages.len() + 1);
        state.messages.push(Message {
            id,
            task_id: task_id.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            attachments: Vec::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        });
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        lock_or_recover(&self.state)
            .tasks
            .iter()
            .find(|task| task.id == task_id)
            .cloned()
    }

    pub fn abort(&self) {
        self.server.abort();
    }
}

pub async fn spawn_stub_backend() -> StubBackend {
    let state: Shared = Arc::new(Mutex::new(StubState {
        tasks: seed_tasks().expect("fixture tasks should decode"),
        profiles: seed_profiles().expect("fixture profiles should decode"),
        ..StubState::default()
    }));

    let router = Router::new()
        .route("/users/me", get(current_profile).patch(update_own_profile))
        .route("/users", get(list_profiles))
        .route("/users/invite", post(invite))
        .route("/users/{id}", patch(update_member))
        .route("/tasks/", get(list_tasks).post(create_task))
        .route("/tasks/{id}", patch(update_task))
        .route("/tasks/{id}/auto-assign", post(auto_assign))
        .route("/messages/", post(send_message))
        .route("/messages/{task_id}", get(list_messages))
        .route("/messages/{task_id}/summarize", post(summarize))
        .route("/agent/flowchart", post(flowchart))
        .route("/agent/meeting-suggestion", post(meeting_suggestion))
        .route("/agent/who-is-overloaded", get(who_is_overloaded))
        .route("/meetings", get(list_meetings))
        .route("/meetings/", post(create_meeting))
        .route("/meetings/{id}/ics", get(meeting_ics))
        .route("/updates", get(list_updates).post(post_update))
        .route("/attachments/signed-url", post(signed_url))
        .route("/upload/{name}", put(receive_upload))
        .with_state(state.clone());

    let (base_url, server) = spawn_router(router).await;
    lock_or_recover(&state).base_url = base_url.clone();

    StubBackend {
        base_url,
        state,
        server,
    }
}

fn authorize(state: &Shared, headers: &HeaderMap) -> StubResult<()> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(ToOwned::to_owned)
        .ok_or((StatusCode::UNAUTHORIZED, "missing bearer token".to_string()))?;
    lock_or_recover(state).last_token = Some(token);
    Ok(())
}

fn not_found(what: &str) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("{what} not found"))
}

/// Overlays the keys of `patch` onto `target` and decodes the result.
fn merged<T: serde::Serialize + serde::de::DeserializeOwned>(
    target: &T,
    patch: &Value,
) -> StubResult<T> {
    let value = serde_json::to_value(target)
        .map_err(|error| (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()))?;
    merged_value(value, patch)
}

fn merged_value<T: serde::de::DeserializeOwned>(mut base: Value, patch: &Value) -> StubResult<T> {
    if let (Some(object), Some(fields)) = (base.as_object_mut(), patch.as_object()) {
        for (key, field) in fields {
            object.insert(key.clone(), field.clone());
        }
    }
    serde_json::from_value(base)
        .map_err(|error| (StatusCode::UNPROCESSABLE_ENTITY, error.to_string()))
}

async fn current_profile(
    State(state): State<Shared>,
    headers: HeaderMap,
) -> StubResult<Json<UserProfile>> {
    authorize(&state, &headers)?;
    let state = lock_or_recover(&state);
    if state.fail_profile {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, String::new()));
    }
    state
        .profiles
        .iter()
        .find(|profile| profile.id == "demo-user")
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found("profile"))
}

async fn update_own_profile(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StubResult<Json<UserProfile>> {
    update_profile_by_id(&state, &headers, "demo-user", &body)
}

async fn update_member(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StubResult<Json<UserProfile>> {
    update_profile_by_id(&state, &headers, &id, &body)
}

fn update_profile_by_id(
    state: &Shared,
    headers: &HeaderMap,
    id: &str,
    body: &Value,
) -> StubResult<Json<UserProfile>> {
    authorize(state, headers)?;
    let mut state = lock_or_recover(state);
    let profile = state
        .profiles
        .iter_mut()
        .find(|profile| profile.id == id)
        .ok_or_else(|| not_found("user"))?;
    *profile = merged(profile, body)?;
    Ok(Json(profile.clone()))
}

async fn list_profiles(
    State(state): State<Shared>,
    headers: HeaderMap,
) -> StubResult<Json<Vec<UserProfile>>> {
    authorize(&state, &headers)?;
    Ok(Json(lock_or_recover(&state).profiles.clone()))
}

async fn invite(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StubResult<(StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;
    let email = body["email"].as_str().unwrap_or_default().to_string();
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "invited", "email": email, "name": body["name"] })),
    ))
}

#[derive(Debug, Deserialize)]
struct TaskListQuery {
    status: Option<String>,
    priority: Option<u8>,
}

async fn list_tasks(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<TaskListQuery>,
) -> StubResult<Json<Vec<Task>>> {
    authorize(&state, &headers)?;
    let mut state = lock_or_recover(&state);
    state.task_list_requests += 1;
    let tasks = state
        .tasks
        .iter()
        .filter(|task| {
            query
                .status
                .as_deref()
                .map_or(true, |status| task.status.as_str() == status)
        })
        .filter(|task| query.priority.map_or(true, |priority| task.priority == Some(priority)))
        .cloned()
        .collect();
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StubResult<(StatusCode, Json<Task>)> {
    authorize(&state, &headers)?;
    if body["title"].as_str().map_or(true, |title| title.trim().is_empty()) {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, "title is required".to_string()));
    }
    let mut state = lock_or_recover(&state);
    let base: Task = serde_json::from_value(json!({
        "id": format!("task-{}", 900 + state.tasks.len()),
        "title": "",
        "status": "open",
        "created_by": STUB_USER_ID,
        "created_at": chrono::Utc::now().to_rfc3339(),
    }))
    .map_err(|error| (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()))?;
    let task = merged(&base, &body)?;
    state.tasks.push(task.clone());
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StubResult<Json<Task>> {
    authorize(&state, &headers)?;
    let delay = lock_or_recover(&state).next_patch_delay.take();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let mut state = lock_or_recover(&state);
    if state.fail_task_patch {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "datastore unavailable".to_string()));
    }
    let task = state
        .tasks
        .iter_mut()
        .find(|task| task.id == id)
        .ok_or_else(|| not_found("task"))?;
    *task = merged(task, &body)?;
    Ok(Json(task.clone()))
}

async fn auto_assign(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> StubResult<Json<Task>> {
    authorize(&state, &headers)?;
    let mut state = lock_or_recover(&state);
    let task = state
        .tasks
        .iter_mut()
        .find(|task| task.id == id)
        .ok_or_else(|| not_found("task"))?;
    task.assigned_to = Some("u-ada".to_string());
    task.predicted_hours = Some(6.5);
    task.ai_reason = Some("Ada has spare capacity".to_string());
    Ok(Json(task.clone()))
}

async fn list_messages(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> StubResult<Json<Vec<Message>>> {
    authorize(&state, &headers)?;
    let mut state = lock_or_recover(&state);
    state.message_list_requests += 1;
    Ok(Json(
        state
            .messages
            .iter()
            .filter(|message| message.task_id == task_id)
            .cloned()
            .collect(),
    ))
}

async fn send_message(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StubResult<(StatusCode, Json<Message>)> {
    authorize(&state, &headers)?;
    let mut state = lock_or_recover(&state);
    let id = format!("msg-{}", state.messages.len() + 1);
    let base = json!({
        "id": id,
        "sender_id": STUB_USER_ID,
        "created_at": chrono::Utc::now().to_rfc3339(),
    });
    let message: Message = merged_value(base, &body)?;
    state.messages.push(message.clone());
    Ok((StatusCode::CREATED, Json(message)))
}

fn agent_available(state: &Shared, headers: &HeaderMap) -> StubResult<()> {
    authorize(state, headers)?;
    if lock_or_recover(state).fail_agent {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "model quota exceeded".to_string()));
    }
    Ok(())
}

async fn summarize(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> StubResult<Json<Value>> {
    agent_available(&state, &headers)?;
    let count = lock_or_recover(&state)
        .messages
        .iter()
        .filter(|message| message.task_id == task_id)
        .count();
    Ok(Json(json!({
        "bullets": ["Design is waiting on feedback"],
        "status": format!("{count} messages"),
        "next_step": "Review the wireframes",
    })))
}

async fn flowchart(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StubResult<Json<Value>> {
    agent_available(&state, &headers)?;
    if body.get("task").is_none() {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, "task is required".to_string()));
    }
    Ok(Json(json!({
        "flowchart_next_step": "Review",
        "recommended_action": "Ask a peer for review",
    })))
}

async fn meeting_suggestion(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StubResult<Json<Value>> {
    agent_available(&state, &headers)?;
    Ok(Json(json!({
        "attendees": body["context"]["attendees"],
        "duration": 30,
        "day": "Wednesday",
        "reason": "Shared free slot",
    })))
}

async fn who_is_overloaded(
    State(state): State<Shared>,
    headers: HeaderMap,
) -> StubResult<Json<Value>> {
    agent_available(&state, &headers)?;
    Ok(Json(json!({
        "overloaded": [{ "name": "Grace Hopper", "utilization": 1.15 }],
        "suggestions": ["Move one task away from Grace Hopper"],
    })))
}

async fn list_meetings(
    State(state): State<Shared>,
    headers: HeaderMap,
) -> StubResult<Json<Vec<Value>>> {
    authorize(&state, &headers)?;
    Ok(Json(lock_or_recover(&state).meetings.clone()))
}

async fn create_meeting(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StubResult<(StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;
    let mut state = lock_or_recover(&state);
    let mut meeting = body;
    meeting["id"] = json!(format!("meet-{}", state.meetings.len() + 1));
    meeting["created_by"] = json!(STUB_USER_ID);
    state.meetings.push(meeting.clone());
    Ok((StatusCode::CREATED, Json(meeting)))
}

async fn meeting_ics(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> StubResult<([(header::HeaderName, &'static str); 1], String)> {
    authorize(&state, &headers)?;
    let state = lock_or_recover(&state);
    let meeting = state
        .meetings
        .iter()
        .find(|meeting| meeting["id"] == id.as_str())
        .ok_or_else(|| not_found("meeting"))?;
    let ics = format!(
        "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:{id}\r\nSUMMARY:{}\r\nEND:VEVENT\r\nEND:VCALENDAR",
        meeting["title"].as_str().unwrap_or_default()
    );
    Ok(([(header::CONTENT_TYPE, "text/calendar")], ics))
}

async fn list_updates(
    State(state): State<Shared>,
    headers: HeaderMap,
) -> StubResult<Json<Vec<Value>>> {
    authorize(&state, &headers)?;
    Ok(Json(lock_or_recover(&state).updates.clone()))
}

async fn post_update(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StubResult<(StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;
    let mut state = lock_or_recover(&state);
    let mut update = body;
    update["id"] = json!(format!("upd-{}", state.updates.len() + 1));
    update["user_id"] = json!(STUB_USER_ID);
    update["user_name"] = json!("Live User");
    state.updates.insert(0, update.clone());
    Ok((StatusCode::CREATED, Json(update)))
}

async fn signed_url(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StubResult<Json<Value>> {
    authorize(&state, &headers)?;
    let filename = body["filename"]
        .as_str()
        .filter(|name| !name.is_empty())
        .ok_or((StatusCode::UNPROCESSABLE_ENTITY, "filename is required".to_string()))?;
    let base_url = lock_or_recover(&state).base_url.clone();
    Ok(Json(json!({
        "upload_url": format!("{base_url}/upload/{filename}"),
        "public_url": format!("https://storage.example/public/{filename}"),
    })))
}

async fn receive_upload(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(name): Path<String>,
    body: Bytes,
) -> StatusCode {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    lock_or_recover(&state).uploads.push(StoredUpload {
        filename: name,
        content_type,
        bytes: body.to_vec(),
    });
    StatusCode::OK
}
