use crate::types::{CompletedSnapshot, TaskKey};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Decides which completed snapshots a store may drop.
pub trait RetentionPolicy: Send + Sync {
    fn expired(&self, snapshots: &[CompletedSnapshot], now: DateTime<Utc>) -> Vec<TaskKey>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeepForever;

impl RetentionPolicy for KeepForever {
    fn expired(&self, _snapshots: &[CompletedSnapshot], _now: DateTime<Utc>) -> Vec<TaskKey> {
        Vec::new()
    }
}

/// Drops snapshots completed (or, lacking that, last updated) more than `days` ago.
///
/// An age too large to subtract from `now` expires nothing.
#[derive(Debug, Clone, Copy)]
pub struct MaxAge {
    pub days: u32,
}

impl RetentionPolicy for MaxAge {
    fn expired(&self, snapshots: &[CompletedSnapshot], now: DateTime<Utc>) -> Vec<TaskKey> {
        let Some(cutoff) = Duration::try_days(i64::from(self.days))
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return Vec::new();
        };
        snapshots
            .iter()
            .filter(|snapshot| reference_time(snapshot).is_some_and(|at| at < cutoff))
            .map(CompletedSnapshot::key)
            .collect()
    }
}

/// Keeps the newest `count` snapshots.
#[derive(Debug, Clone, Copy)]
pub struct MaxEntries {
    pub count: usize,
}

impl RetentionPolicy for MaxEntries {
    fn expired(&self, snapshots: &[CompletedSnapshot], _now: DateTime<Utc>) -> Vec<TaskKey> {
        if snapshots.len() <= self.count {
            return Vec::new();
        }
        let mut ordered: Vec<&CompletedSnapshot> = snapshots.iter().collect();
        // Newest first; undated entries sort last and are dropped first.
        ordered.sort_by(|a, b| {
            reference_time(b)
                .cmp(&reference_time(a))
                .then_with(|| a.key().cmp(&b.key()))
        });
        ordered
            .into_iter()
            .skip(self.count)
            .map(CompletedSnapshot::key)
            .collect()
    }
}

fn reference_time(snapshot: &CompletedSnapshot) -> Option<DateTime<Utc>> {
    snapshot.completed_at.or(snapshot.updated_at)
}

/// Retention as written in the config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetentionConfig {
    #[default]
    KeepForever,
    MaxAge {
        days: u32,
    },
    MaxEntries {
        count: usize,
    },
}

impl RetentionPolicy for RetentionConfig {
    fn expired(&self, snapshots: &[CompletedSnapshot], now: DateTime<Utc>) -> Vec<TaskKey> {
        match *self {
            Self::KeepForever => KeepForever.expired(snapshots, now),
            Self::MaxAge { days } => MaxAge { days }.expired(snapshots, now),
            Self::MaxEntries { count } => MaxEntries { count }.expired(snapshots, now),
        }
    }
}
