use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use crate::board::{self, Column};
use crate::chat::ChatChannel;
use crate::composer::{self, TaskDraft, DEFAULT_PRIORITY};
use crate::config::Config;
use crate::editor::TaskEditor;
use crate::ics::parse_meeting_time;
use crate::models::{
    Complexity, MeetingContext, Message, ProfilePatch, Task, TaskFilters, TaskPatch, TaskStatus,
    UpdatePriority,
};
use crate::query::QueryState;
use crate::state::AppState;
use crate::team::{self, MeetingDraft, Onboarding};

const UPCOMING_LIMIT: usize = 5;

#[derive(Debug, Parser)]
#[command(name = "opsdesk", about = "Task board, chat and calendar client for the ops backend")]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the kanban board.
    Board {
        #[arg(long, default_value = "")]
        search: String,
        /// One column per status instead of the grouped view.
        #[arg(long)]
        per_status: bool,
    },
    /// List tasks, optionally filtered.
    Tasks {
        #[arg(long, value_parser = parse_status)]
        status: Option<TaskStatus>,
        #[arg(long)]
        priority: Option<u8>,
    },
    /// Move a task to another status.
    Status {
        task_id: String,
        #[arg(value_parser = parse_status)]
        status: TaskStatus,
    },
    /// Let the backend pick an assignee.
    Assign { task_id: String },
    /// Edit task fields in place.
    Edit {
        task_id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<u8>,
        /// YYYY-MM-DD.
        #[arg(long)]
        deadline: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long, value_parser = parse_complexity)]
        complexity: Option<Complexity>,
    },
    /// Attach a file (uploaded first) or an existing URL to a task.
    Attach {
        task_id: String,
        #[arg(long, conflicts_with = "url", required_unless_present = "url")]
        file: Option<PathBuf>,
        #[arg(long)]
        url: Option<String>,
    },
    /// Create a task.
    Create {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Comma-separated.
        #[arg(long, default_value = "")]
        tags: String,
        #[arg(long, default_value_t = DEFAULT_PRIORITY)]
        priority: u8,
        #[arg(long, value_parser = parse_complexity, default_value = "medium")]
        complexity: Complexity,
        #[arg(long, default_value = "")]
        customer: String,
        #[arg(long, default_value = "")]
        project: String,
        #[arg(long)]
        prd: Option<PathBuf>,
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },
    /// Show a task's chat, post to it, or follow it.
    Chat {
        task_id: String,
        #[arg(long)]
        send: Option<String>,
        /// Keep polling and print new messages until interrupted.
        #[arg(long)]
        watch: bool,
        /// Include the chat summary and predicted next step.
        #[arg(long)]
        insights: bool,
    },
    /// Show or edit the signed-in profile.
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        availability: Option<String>,
    },
    /// Fill in role and resume for a new account.
    Onboard {
        #[arg(long)]
        role: String,
        /// Comma-separated.
        #[arg(long, default_value = "")]
        skills: String,
        #[arg(long)]
        capacity_hours: Option<f64>,
        #[arg(long, conflicts_with = "resume_url")]
        resume: Option<PathBuf>,
        #[arg(long)]
        resume_url: Option<String>,
    },
    /// List team members with their workload.
    Team,
    /// Invite someone by email.
    Invite {
        email: String,
        #[arg(long, default_value = team::DEFAULT_INVITE_ROLE)]
        role: String,
    },
    /// List meetings.
    Meetings {
        /// Only meetings starting today (UTC).
        #[arg(long)]
        today: bool,
    },
    /// Schedule a meeting.
    Schedule {
        title: String,
        /// ISO date and time, e.g. 2026-10-21T14:00.
        #[arg(long)]
        date: String,
        #[arg(long, default_value_t = team::DEFAULT_MEETING_MINUTES)]
        duration: u32,
        /// Comma-separated.
        #[arg(long, default_value = "")]
        attendees: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        task: Option<String>,
        /// Ask for a slot suggestion instead of scheduling.
        #[arg(long)]
        suggest: bool,
    },
    /// Export a meeting as an .ics file.
    Ics {
        meeting_id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List team updates.
    Updates,
    /// Post a team update.
    Post {
        message: String,
        #[arg(long, value_parser = parse_update_priority, default_value = "medium")]
        priority: UpdatePriority,
        #[arg(long)]
        task: Option<String>,
    },
    /// Board statistics, deadlines, workload and notifications.
    Dashboard,
}

fn parse_status(value: &str) -> Result<TaskStatus, String> {
    TaskStatus::parse(value).ok_or_else(|| {
        let known: Vec<_> = TaskStatus::ALL.iter().map(TaskStatus::as_str).collect();
        format!("unknown status '{value}', expected one of {}", known.join(", "))
    })
}

fn parse_complexity(value: &str) -> Result<Complexity, String> {
    Complexity::parse(value).ok_or_else(|| format!("unknown complexity '{value}'"))
}

fn parse_update_priority(value: &str) -> Result<UpdatePriority, String> {
    match value.trim() {
        "low" => Ok(UpdatePriority::Low),
        "medium" => Ok(UpdatePriority::Medium),
        "high" => Ok(UpdatePriority::High),
        _ => Err(format!("unknown priority '{value}'")),
    }
}

/// Unwraps a settled query, turning idle and error states into CLI errors.
fn loaded<V>(state: QueryState<V>, what: &str) -> anyhow::Result<Arc<V>> {
    match state {
        QueryState::Success(value) => Ok(value),
        QueryState::Error(message) => Err(anyhow!("failed to load {what}: {message}")),
        QueryState::Idle => bail!("not signed in, set OPSDESK_ID_TOKEN or pass --mock-data"),
        QueryState::Loading => bail!("{what} are still loading"),
    }
}

async fn find_task(state: &AppState, task_id: &str) -> anyhow::Result<Task> {
    let tasks = loaded(state.queries.tasks(TaskFilters::default()).await, "tasks")?;
    tasks
        .iter()
        .find(|task| task.id == task_id)
        .cloned()
        .ok_or_else(|| anyhow!("task '{task_id}' not found"))
}

async fn editor_for(state: &AppState, task_id: &str) -> anyhow::Result<TaskEditor> {
    let task = find_task(state, task_id).await?;
    Ok(TaskEditor::new(state.queries.clone(), task))
}

fn print_task(task: &Task) {
    println!(
        "{:<12} {:<12} p{} {:<10} {:<12} {}",
        task.id,
        task.status.as_str(),
        task.priority.map_or_else(|| "-".to_string(), |p| p.to_string()),
        task.deadline.as_deref().unwrap_or("-"),
        task.assigned_to.as_deref().unwrap_or("unassigned"),
        task.title
    );
}

fn print_board(columns: &[Column]) {
    for column in columns {
        println!("== {} ({})", column.title, column.tasks.len());
        for task in &column.tasks {
            println!("   {}  {}", task.id, task.title);
        }
    }
}

fn print_message(message: &Message) {
    println!("[{}] {}: {}", message.created_at, message.sender_id, message.text);
    for attachment in &message.attachments {
        println!("    attachment: {attachment}");
    }
}

pub async fn run(state: &AppState, command: Command) -> anyhow::Result<()> {
    let queries = &state.queries;
    match command {
        Command::Board { search, per_status } => {
            let tasks = loaded(queries.tasks(TaskFilters::default()).await, "tasks")?;
            let columns = if per_status {
                board::status_columns()
            } else {
                board::grouped_columns()
            };
            print_board(&board::board(&tasks, &search, &columns));
        }
        Command::Tasks { status, priority } => {
            let tasks = loaded(queries.tasks(TaskFilters { status, priority }).await, "tasks")?;
            tasks.iter().for_each(print_task);
        }
        Command::Status { task_id, status } => {
            let task = editor_for(state, &task_id).await?.set_status(status).await?;
            print_task(&task);
        }
        Command::Assign { task_id } => {
            let task = editor_for(state, &task_id).await?.auto_assign().await?;
            print_task(&task);
            if let Some(reason) = &task.ai_reason {
                println!("reason: {reason}");
            }
        }
        Command::Edit {
            task_id,
            title,
            description,
            priority,
            deadline,
            assignee,
            complexity,
        } => {
            let patch = TaskPatch {
                title,
                description,
                priority,
                deadline,
                assigned_to: assignee,
                complexity,
                ..TaskPatch::default()
            };
            let task = editor_for(state, &task_id).await?.edit_fields(patch).await?;
            print_task(&task);
        }
        Command::Attach { task_id, file, url } => {
            let editor = editor_for(state, &task_id).await?;
            let task = match (file, url) {
                (Some(path), _) => editor
                    .upload_attachment(&path)
                    .await
                    .with_context(|| format!("failed to attach {}", path.display()))?,
                (None, Some(url)) => editor.add_attachment(&url).await?,
                (None, None) => bail!("pass --file or --url"),
            };
            task.attachments.iter().for_each(|url| println!("{url}"));
        }
        Command::Create {
            title,
            description,
            tags,
            priority,
            complexity,
            customer,
            project,
            prd,
            attachments,
        } => {
            let draft = TaskDraft {
                title,
                description,
                complexity,
                tags,
                priority,
                customer_name: customer,
                project_name: project,
                prd_file: prd,
                attachment_files: attachments,
            };
            let task = composer::submit(queries, &draft)
                .await
                .context("failed to create task")?;
            print_task(&task);
        }
        Command::Chat {
            task_id,
            send,
            watch,
            insights,
        } => run_chat(state, &task_id, send, watch, insights).await?,
        Command::Profile {
            name,
            phone,
            bio,
            availability,
        } => {
            let patch = ProfilePatch {
                name,
                phone,
                bio,
                availability,
                ..ProfilePatch::default()
            };
            let profile = if patch.is_empty() {
                state
                    .session()
                    .refresh_profile()
                    .await
                    .context("failed to load profile")?
            } else {
                team::update_own_profile(queries, &patch).await?
            };
            println!("{} <{}>", profile.name, profile.email.as_deref().unwrap_or("-"));
            println!("role: {}", profile.role.as_deref().unwrap_or("-"));
            println!("workload: {}%", profile.workload_percent());
            if profile.needs_onboarding() {
                println!("onboarding incomplete, run `opsdesk onboard`");
            }
        }
        Command::Onboard {
            role,
            skills,
            capacity_hours,
            resume,
            resume_url,
        } => {
            let form = Onboarding {
                role,
                skills,
                capacity_hours,
                resume_file: resume,
                resume_url,
                ..Onboarding::default()
            };
            let profile = team::complete_onboarding(queries, &form).await?;
            println!("onboarded as {}", profile.role.as_deref().unwrap_or("-"));
        }
        Command::Team => {
            let profiles = loaded(queries.employees().await, "employees")?;
            for row in team::workload(&profiles) {
                let flag = if row.overloaded { " !" } else { "" };
                println!("{:<12} {:<20} {:>4}%{flag}", row.user_id, row.name, row.percent);
            }
        }
        Command::Invite { email, role } => {
            let invite = team::invite_member(queries, &email, &role).await?;
            println!("invited {} as {}", invite.email, invite.role);
        }
        Command::Meetings { today } => {
            let meetings = loaded(queries.meetings().await, "meetings")?;
            let shown = if today {
                team::meetings_on(&meetings, Utc::now().date_naive())
            } else {
                meetings.to_vec()
            };
            for meeting in shown {
                println!(
                    "{:<10} {} {:>3}m {} [{}]",
                    meeting.id,
                    meeting.date,
                    meeting.duration_minutes,
                    meeting.title,
                    meeting.attendees.join(", ")
                );
            }
        }
        Command::Schedule {
            title,
            date,
            duration,
            attendees,
            description,
            task,
            suggest,
        } => {
            if suggest {
                let context = MeetingContext {
                    attendees: crate::models::split_list(&attendees),
                    preferred_day: preferred_day(&date)?,
                    description,
                };
                println!("{}", team::suggest_meeting(queries, &context).await);
                return Ok(());
            }
            let draft = MeetingDraft {
                title,
                description,
                attendees,
                date,
                duration_minutes: duration,
                task_id: task,
                meet_url: None,
            };
            let meeting = team::schedule_meeting(queries, &draft).await?;
            println!("scheduled {} at {}", meeting.id, meeting.date);
        }
        Command::Ics { meeting_id, out } => {
            let bytes = team::export_ics(queries, &meeting_id).await?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, &bytes)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("wrote {}", path.display());
                }
                None => print!("{}", String::from_utf8_lossy(&bytes)),
            }
        }
        Command::Updates => {
            let updates = loaded(queries.updates().await, "updates")?;
            for update in updates.iter() {
                println!(
                    "{:?} {}: {}",
                    update.priority,
                    update.user_name.as_deref().unwrap_or(&update.user_id),
                    update.message
                );
            }
        }
        Command::Post {
            message,
            priority,
            task,
        } => {
            let update = team::post_update(queries, priority, &message, task).await?;
            println!("posted {}", update.id);
        }
        Command::Dashboard => run_dashboard(state).await?,
    }
    Ok(())
}

async fn run_chat(
    state: &AppState,
    task_id: &str,
    send: Option<String>,
    watch: bool,
    insights: bool,
) -> anyhow::Result<()> {
    let channel = ChatChannel::open(
        state.queries.clone(),
        task_id,
        state.config.chat_poll_interval(),
    );

    if let Some(text) = send {
        channel.send(&text, Vec::new()).await?;
    }
    let messages = channel.refresh().await.context("failed to load messages")?;
    messages.iter().for_each(print_message);

    if insights {
        println!("-- summary\n{}", channel.summarize().await);
        let task = find_task(state, task_id).await?;
        println!("-- next step\n{}", channel.predict_next_step(&task).await);
    }

    if !watch {
        return Ok(());
    }
    let mut shown = messages.len();
    let mut updates = WatchStream::new(channel.subscribe());
    loop {
        tokio::select! {
            next = updates.next() => {
                let Some(latest) = next else { break };
                let Some(latest) = latest else { continue };
                latest.iter().skip(shown).for_each(print_message);
                shown = latest.len();
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn run_dashboard(state: &AppState) -> anyhow::Result<()> {
    let queries = &state.queries;
    let tasks = loaded(queries.tasks(TaskFilters::default()).await, "tasks")?;
    let stats = board::stats(&tasks);
    println!(
        "active {}  due {}  high priority {}  avg predicted {:.1}h",
        stats.active, stats.open_with_deadline, stats.high_priority, stats.average_predicted_hours
    );
    if let Some((first, last)) = board::deadline_span(&tasks) {
        println!("deadlines span {first} .. {last}");
    }

    println!("-- upcoming deadlines");
    for task in board::upcoming_deadlines(&tasks, UPCOMING_LIMIT) {
        println!("{}  {}", task.deadline.as_deref().unwrap_or("-"), task.title);
    }

    println!("-- workload");
    match queries.employees().await {
        QueryState::Success(profiles) => {
            for row in team::workload(&profiles) {
                println!("{:<20} {:>4}%", row.name, row.percent);
            }
        }
        other => tracing::warn!(error = other.error().unwrap_or("idle"), "employees unavailable"),
    }

    println!("-- notifications");
    if let Some(updates) = queries.updates().await.data() {
        for update in team::notifications(&updates) {
            println!("{}", update.message);
        }
    }

    println!("-- insights");
    for line in team::overload_summary(queries).await {
        println!("{line}");
    }
    Ok(())
}

/// The suggestion endpoint takes a calendar day, not a timestamp.
fn preferred_day(date: &str) -> anyhow::Result<String> {
    let start = parse_meeting_time(date)
        .ok_or_else(|| anyhow!("date must be an ISO date and time, got '{date}'"))?;
    Ok(start.date_naive().format("%Y-%m-%d").to_string())
}
