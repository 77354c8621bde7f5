use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which provider a task came from. Serialized by display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskSource {
    IssueTracker,
    TodoList,
    Board,
    ActionItems,
    Other(String),
}

impl TaskSource {
    pub const ISSUE_TRACKER: &'static str = "GitHub";
    pub const TODO_LIST: &'static str = "Google Tasks";
    pub const BOARD: &'static str = "Trello";
    pub const ACTION_ITEMS: &'static str = "Fellow";
    pub const OTHER: &'static str = "Other";

    pub fn parse(value: &str) -> Self {
        match value.trim() {
            Self::ISSUE_TRACKER => Self::IssueTracker,
            Self::TODO_LIST => Self::TodoList,
            Self::BOARD => Self::Board,
            Self::ACTION_ITEMS => Self::ActionItems,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::IssueTracker => Self::ISSUE_TRACKER,
            Self::TodoList => Self::TODO_LIST,
            Self::Board => Self::BOARD,
            Self::ActionItems => Self::ACTION_ITEMS,
            Self::Other(name) => name,
        }
    }

    /// Prefix the provider normalizers put in front of native ids to build view ids.
    pub fn view_prefix(&self) -> Option<&'static str> {
        match self {
            Self::IssueTracker => Some("github-"),
            Self::TodoList => Some("google-"),
            Self::Board => Some("trello-"),
            Self::ActionItems => Some("fellow-"),
            Self::Other(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Other(name) if name.trim().is_empty())
    }
}

impl Default for TaskSource {
    fn default() -> Self {
        Self::Other(Self::OTHER.to_string())
    }
}

impl fmt::Display for TaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for TaskSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for TaskSource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.display_name())
    }
}

impl<'de> Deserialize<'de> for TaskSource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}
