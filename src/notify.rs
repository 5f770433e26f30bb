use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Duration, Utc};

const MAX_PENDING: usize = 32;
pub const DEFAULT_DURATION_SECS: i64 = 3;
pub const PLAYBACK_ERROR_DURATION_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Success,
    Info,
    Error,
}

/// A transient, dismissible message for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub level: Level,
    pub title: String,
    pub description: Option<String>,
    pub duration: Duration,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at >= self.duration
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.level {
            Level::Success => "ok",
            Level::Info => "--",
            Level::Error => "!!",
        };
        match &self.description {
            Some(description) => write!(f, "[{marker}] {}: {description}", self.title),
            None => write!(f, "[{marker}] {}", self.title),
        }
    }
}

/// FIFO of pending notifications. The oldest is dropped once it is full.
#[derive(Debug, Default)]
pub struct Notifier {
    pending: VecDeque<Notification>,
    next_id: u64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        level: Level,
        title: impl Into<String>,
        description: Option<String>,
        duration: Duration,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        if self.pending.len() == MAX_PENDING {
            self.pending.pop_front();
        }
        self.pending.push_back(Notification {
            id,
            level,
            title: title.into(),
            description,
            duration,
            created_at: Utc::now(),
        });
        id
    }

    pub fn success(&mut self, title: impl Into<String>) -> u64 {
        self.push(
            Level::Success,
            title,
            None,
            Duration::seconds(DEFAULT_DURATION_SECS),
        )
    }

    pub fn error(&mut self, title: impl Into<String>, description: impl fmt::Display) -> u64 {
        self.push(
            Level::Error,
            title,
            Some(description.to_string()),
            Duration::seconds(DEFAULT_DURATION_SECS),
        )
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.pending.len();
        self.pending.retain(|n| n.id != id);
        self.pending.len() != before
    }

    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        self.pending.retain(|n| !n.is_expired(now));
    }

    pub fn pending(&self) -> impl Iterator<Item = &Notification> {
        self.pending.iter()
    }

    pub fn drain(&mut self) -> Vec<Notification> {
        self.pending.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
