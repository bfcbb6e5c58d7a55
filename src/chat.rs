use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{ClientError, ClientResult};
use crate::models::{ChatSummary, Message, NewMessage, Task};
use crate::poll::Poller;
use crate::queries::Queries;

pub const SUMMARY_UNAVAILABLE: &str = "Summary unavailable right now.";
pub const PREDICTION_UNAVAILABLE: &str = "Next-step prediction unavailable right now.";

/// Message thread of one task, kept current by polling.
///
/// Messages are shown in server order with no local resorting or
/// de-duplication. Only server-confirmed messages ever appear.
pub struct ChatChannel {
    queries: Arc<Queries>,
    interval: Duration,
    task_id: String,
    poller: Poller<Vec<Message>>,
}

fn message_poller(queries: &Arc<Queries>, task_id: &str, interval: Duration) -> Poller<Vec<Message>> {
    let queries = queries.clone();
    let task_id = task_id.to_string();
    Poller::start("chat", interval, move || {
        let queries = queries.clone();
        let task_id = task_id.clone();
        async move {
            let token = queries.write_token()?;
            queries
                .source()
                .list_messages(token.as_deref(), &task_id)
                .await
        }
    })
}

impl ChatChannel {
    pub fn open(queries: Arc<Queries>, task_id: &str, interval: Duration) -> Self {
        let poller = message_poller(&queries, task_id, interval);
        tracing::debug!(task_id, "chat channel opened");
        Self {
            queries,
            interval,
            task_id: task_id.to_string(),
            poller,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Rebinds the channel. The old timer is cancelled before the new one
    /// starts, so no request for the previous task is issued afterwards.
    pub fn switch_task(&mut self, task_id: &str) {
        if task_id == self.task_id {
            return;
        }
        self.poller.stop();
        self.poller = message_poller(&self.queries, task_id, self.interval);
        tracing::debug!(from = %self.task_id, to = task_id, "chat channel switched");
        self.task_id = task_id.to_string();
    }

    pub fn messages(&self) -> Vec<Message> {
        self.poller.latest().unwrap_or_default()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Vec<Message>>> {
        self.poller.subscribe()
    }

    pub async fn refresh(&self) -> ClientResult<Vec<Message>> {
        self.poller.refresh().await
    }

    /// Posts a message, then refreshes right away so the sender sees the
    /// server's copy without waiting for the next tick.
    pub async fn send(&self, text: &str, attachments: Vec<String>) -> ClientResult<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::validation("message must not be empty"));
        }
        let token = self.queries.write_token()?;
        let sent = self
            .queries
            .source()
            .send_message(
                token.as_deref(),
                &NewMessage {
                    task_id: self.task_id.clone(),
                    text: text.to_string(),
                    attachments,
                },
            )
            .await?;
        tracing::info!(task_id = %self.task_id, message_id = %sent.id, "message sent");

        if let Err(error) = self.refresh().await {
            tracing::warn!(task_id = %self.task_id, error = %error, "refresh after send failed");
        }
        Ok(sent)
    }

    /// Chat summary for display. Failures degrade to a placeholder.
    pub async fn summarize(&self) -> String {
        let summary = async {
            let token = self.queries.write_token()?;
            self.queries
                .source()
                .summarize_chat(token.as_deref(), &self.task_id)
                .await
        }
        .await;

        match summary {
            Ok(summary) => render_summary(&summary),
            Err(error) => {
                tracing::warn!(task_id = %self.task_id, error = %error, "chat summary unavailable");
                SUMMARY_UNAVAILABLE.to_string()
            }
        }
    }

    /// Predicted next workflow step for display. Failures degrade to a
    /// placeholder.
    pub async fn predict_next_step(&self, task: &Task) -> String {
        let prediction = async {
            let token = self.queries.write_token()?;
            self.queries
                .source()
                .predict_flowchart(token.as_deref(), task)
                .await
        }
        .await;

        match prediction {
            Ok(prediction) => format!(
                "{}: {}",
                prediction.flowchart_next_step, prediction.recommended_action
            ),
            Err(error) => {
                tracing::warn!(task_id = %task.id, error = %error, "flowchart prediction unavailable");
                PREDICTION_UNAVAILABLE.to_string()
            }
        }
    }
}

fn render_summary(summary: &ChatSummary) -> String {
    let mut lines: Vec<String> = summary
        .bullets
        .iter()
        .map(|bullet| format!("- {bullet}"))
        .collect();
    if !summary.status.is_empty() {
        lines.push(format!("Status: {}", summary.status));
    }
    if let Some(next_step) = &summary.next_step {
        lines.push(format!("Next step: {next_step}"));
    }
    lines.join("\n")
}
