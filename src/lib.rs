//! Client-side synchronization layer for the ops backend: cached resource
//! queries, the task board and editor, polling chat, and the team and
//! calendar operations around them.

pub mod api;
pub mod board;
pub mod chat;
pub mod cli;
pub mod composer;
pub mod config;
pub mod editor;
pub mod error;
pub mod ics;
pub mod models;
pub mod poll;
pub mod queries;
pub mod query;
pub mod session;
pub mod source;
pub mod state;
pub mod sync;
pub mod team;
#[cfg(test)]
mod test_support;
