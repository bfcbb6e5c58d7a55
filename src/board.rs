//! Kanban columns derived from a flat task list.
//!
//! Everything here is pure: the same tasks and column configuration always
//! produce the same board.

use crate::models::{Task, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub key: &'static str,
    pub title: &'static str,
    /// Statuses routed to this column. A task lands in the first column
    /// whose set contains its status.
    pub statuses: Vec<TaskStatus>,
    /// Secondary view for columns with no statuses of their own: every task
    /// in this status is shown here as well as in its primary column.
    pub mirror: Option<TaskStatus>,
}

impl ColumnDef {
    pub fn new(key: &'static str, title: &'static str, statuses: &[TaskStatus]) -> Self {
        Self {
            key,
            title,
            statuses: statuses.to_vec(),
            mirror: None,
        }
    }

    pub fn mirroring(key: &'static str, title: &'static str, status: TaskStatus) -> Self {
        Self {
            key,
            title,
            statuses: Vec::new(),
            mirror: Some(status),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub key: &'static str,
    pub title: &'static str,
    pub tasks: Vec<Task>,
}

/// Backlog, In progress, Done, plus a Stuck view of blocked tasks. Blocked
/// tasks therefore show up twice: once as backlog work, once as stuck work.
pub fn grouped_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("backlog", "Backlog", &[TaskStatus::Open, TaskStatus::Blocked]),
        ColumnDef::new(
            "progress",
            "In progress",
            &[TaskStatus::InProgress, TaskStatus::InReview],
        ),
        ColumnDef::new("done", "Done", &[TaskStatus::Completed]),
        ColumnDef::mirroring("stuck", "Stuck", TaskStatus::Blocked),
    ]
}

/// One column per status, in lifecycle order.
pub fn status_columns() -> Vec<ColumnDef> {
    TaskStatus::ALL
        .into_iter()
        .map(|status| ColumnDef::new(status.as_str(), status.label(), &[status]))
        .collect()
}

pub fn partition(tasks: &[Task], columns: &[ColumnDef]) -> Vec<Column> {
    let mut board: Vec<Column> = columns
        .iter()
        .map(|column| Column {
            key: column.key,
            title: column.title,
            tasks: Vec::new(),
        })
        .collect();

    for task in tasks {
        if let Some(index) = columns
            .iter()
            .position(|column| column.statuses.contains(&task.status))
        {
            board[index].tasks.push(task.clone());
        }
    }

    for (index, column) in columns.iter().enumerate() {
        let Some(mirrored) = column.mirror.filter(|_| column.statuses.is_empty()) else {
            continue;
        };
        board[index].tasks = tasks
            .iter()
            .filter(|task| task.status == mirrored)
            .cloned()
            .collect();
    }

    board
}

/// Case-insensitive substring match on the title. Whitespace in the query
/// is significant; only an empty query keeps every task.
pub fn search(tasks: &[Task], query: &str) -> Vec<Task> {
    let needle = query.to_lowercase();
    tasks
        .iter()
        .filter(|task| needle.is_empty() || task.title.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

pub fn board(tasks: &[Task], query: &str, columns: &[ColumnDef]) -> Vec<Column> {
    partition(&search(tasks, query), columns)
}

/// Tasks that have a deadline, earliest first. Deadlines are ISO dates, so
/// lexical order is chronological.
pub fn upcoming_deadlines(tasks: &[Task], limit: usize) -> Vec<Task> {
    let mut dated: Vec<Task> = tasks
        .iter()
        .filter(|task| task.deadline.is_some())
        .cloned()
        .collect();
    dated.sort_by(|left, right| left.deadline.cmp(&right.deadline));
    dated.truncate(limit);
    dated
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardStats {
    pub active: usize,
    pub open_with_deadline: usize,
    pub high_priority: usize,
    pub average_predicted_hours: f64,
}

pub fn stats(tasks: &[Task]) -> BoardStats {
    let active = tasks
        .iter()
        .filter(|task| task.status != TaskStatus::Completed)
        .count();
    let open_with_deadline = tasks
        .iter()
        .filter(|task| task.deadline.is_some() && task.status != TaskStatus::Completed)
        .count();
    let high_priority = tasks
        .iter()
        .filter(|task| task.priority.unwrap_or(0) >= 4)
        .count();
    let predicted: f64 = tasks.iter().filter_map(|task| task.predicted_hours).sum();

    BoardStats {
        active,
        open_with_deadline,
        high_priority,
        average_predicted_hours: predicted / tasks.len().max(1) as f64,
    }
}

/// Earliest and latest deadline across the tasks.
pub fn deadline_span(tasks: &[Task]) -> Option<(String, String)> {
    let mut deadlines = tasks.iter().filter_map(|task| task.deadline.as_deref());
    let first = deadlines.next()?;
    let (min, max) = deadlines.fold((first, first), |(min, max), deadline| {
        (min.min(deadline), max.max(deadline))
    });
    Some((min.to_string(), max.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn task(id: &str, title: &str, status: &str, deadline: Option<&str>) -> Task {
        serde_json::from_value(json!({
            "id": id,
            "title": title,
            "status": status,
            "deadline": deadline,
        }))
        .expect("task should decode")
    }

    fn keys(column: &Column) -> Vec<&str> {
        column.tasks.iter().map(|task| task.id.as_str()).collect()
    }

    fn sample() -> Vec<Task> {
        vec![
            task("t1", "Write launch post", "open", None),
            task("t2", "Fix login redirect", "blocked", Some("2026-10-24")),
            task("t3", "Review billing copy", "in_review", Some("2026-11-02")),
            task("t4", "Ship invoices", "completed", Some("2026-10-15")),
            task("t5", "Build importer", "in_progress", Some("2026-10-30")),
        ]
    }

    #[test]
    fn every_task_lands_in_exactly_one_primary_column() {
        let tasks = sample();
        let columns = status_columns();
        let board = partition(&tasks, &columns);

        for task in &tasks {
            let homes: Vec<&str> = board
                .iter()
                .filter(|column| column.tasks.iter().any(|candidate| candidate.id == task.id))
                .map(|column| column.key)
                .collect();
            assert_eq!(homes, [task.status.as_str()]);
        }
    }

    #[test]
    fn blocked_tasks_appear_in_backlog_and_stuck() {
        let board = partition(&sample(), &grouped_columns());

        let titles: Vec<&str> = board.iter().map(|column| column.title).collect();
        assert_eq!(titles, ["Backlog", "In progress", "Done", "Stuck"]);

        assert_eq!(keys(&board[0]), ["t1", "t2"]);
        assert_eq!(keys(&board[1]), ["t3", "t5"]);
        assert_eq!(keys(&board[2]), ["t4"]);
        assert_eq!(keys(&board[3]), ["t2"], "stuck mirrors blocked tasks");
    }

    #[test]
    fn open_task_without_deadline_is_backlog_but_not_upcoming() {
        let tasks = sample();
        let board = partition(&tasks, &grouped_columns());
        assert!(keys(&board[0]).contains(&"t1"));

        let upcoming = upcoming_deadlines(&tasks, 10);
        assert!(upcoming.iter().all(|task| task.id != "t1"));
        let order: Vec<&str> = upcoming.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(order, ["t4", "t2", "t5", "t3"]);
        assert_eq!(upcoming_deadlines(&tasks, 2).len(), 2);
    }

    #[test]
    fn search_is_case_insensitive_on_title_only() {
        let tasks = sample();
        let found = board(&tasks, "LOGIN", &grouped_columns());
        assert_eq!(keys(&found[0]), ["t2"]);
        assert_eq!(keys(&found[3]), ["t2"]);
        assert!(found[1].tasks.is_empty());

        assert_eq!(search(&tasks, "").len(), tasks.len());
        let spaced: Vec<String> = search(&tasks, " login ")
            .into_iter()
            .map(|task| task.id)
            .collect();
        assert_eq!(spaced, ["t2"]);
        assert!(search(&tasks, " fix").is_empty(), "leading space is not trimmed");
    }

    #[test]
    fn column_order_follows_input_order() {
        let mut tasks = sample();
        tasks.reverse();
        let board = partition(&tasks, &grouped_columns());
        assert_eq!(keys(&board[0]), ["t2", "t1"]);
    }

    #[test]
    fn stats_ignore_completed_work() {
        let mut tasks = sample();
        tasks[0].priority = Some(5);
        tasks[1].predicted_hours = Some(10.0);
        let stats = stats(&tasks);
        assert_eq!(stats.active, 4);
        assert_eq!(stats.open_with_deadline, 3);
        assert_eq!(stats.high_priority, 1);
        assert_eq!(stats.average_predicted_hours, 2.0);

        assert_eq!(
            deadline_span(&tasks),
            Some(("2026-10-15".to_string(), "2026-11-02".to_string()))
        );
        assert_eq!(deadline_span(&[]), None);
    }
}
