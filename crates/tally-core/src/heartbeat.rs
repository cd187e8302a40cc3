//! Raw activity heartbeats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dimension::Dimension;
use crate::types::IdentityId;

/// A single timestamped activity ping sent by an editor or tool.
///
/// Heartbeats are immutable once ingested. Tags are optional; blank tags are
/// treated as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Unique identifier assigned at ingestion.
    pub id: String,
    /// The canonical identity that owns this heartbeat.
    pub identity: IdentityId,
    /// When the activity happened.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// The tags that decide whether two consecutive heartbeats continue the
/// same activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Context<'a> {
    project: Option<&'a str>,
    language: Option<&'a str>,
    editor: Option<&'a str>,
    machine: Option<&'a str>,
}

impl Heartbeat {
    /// Creates an untagged heartbeat.
    pub fn new(id: impl Into<String>, identity: IdentityId, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            identity,
            timestamp,
            project: None,
            language: None,
            editor: None,
            machine: None,
            category: None,
        }
    }

    /// Sets the tag for `dimension`.
    #[must_use]
    pub fn with(mut self, dimension: Dimension, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match dimension {
            Dimension::Project => self.project = value,
            Dimension::Language => self.language = value,
            Dimension::Editor => self.editor = value,
            Dimension::Machine => self.machine = value,
            Dimension::Category => self.category = value,
        }
        self
    }

    /// Returns the tag for `dimension`, or `None` if it is missing or blank.
    pub fn tag(&self, dimension: Dimension) -> Option<&str> {
        let raw = match dimension {
            Dimension::Project => self.project.as_deref(),
            Dimension::Language => self.language.as_deref(),
            Dimension::Editor => self.editor.as_deref(),
            Dimension::Machine => self.machine.as_deref(),
            Dimension::Category => self.category.as_deref(),
        };
        raw.map(str::trim).filter(|tag| !tag.is_empty())
    }

    pub(crate) fn context(&self) -> Context<'_> {
        Context {
            project: self.tag(Dimension::Project),
            language: self.tag(Dimension::Language),
            editor: self.tag(Dimension::Editor),
            machine: self.tag(Dimension::Machine),
        }
    }

    /// True when both heartbeats carry the same time and the same tags.
    pub(crate) fn duplicates(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
            && Dimension::ALL
                .iter()
                .all(|&dimension| self.tag(dimension) == other.tag(dimension))
    }
}
