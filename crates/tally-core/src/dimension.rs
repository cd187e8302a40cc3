//! Summary dimensions and the keys of a summary breakdown.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SummaryError;

/// A tag axis along which durations are broken down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dimension {
    Project,
    Language,
    Editor,
    Machine,
    Category,
}

impl Dimension {
    /// Every dimension, in breakdown order.
    pub const ALL: [Self; 5] = [
        Self::Project,
        Self::Language,
        Self::Editor,
        Self::Machine,
        Self::Category,
    ];

    /// Lowercase name used in keys, filters and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Language => "language",
            Self::Editor => "editor",
            Self::Machine => "machine",
            Self::Category => "category",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = SummaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "project" => Ok(Self::Project),
            "language" => Ok(Self::Language),
            "editor" => Ok(Self::Editor),
            "machine" => Ok(Self::Machine),
            "category" => Ok(Self::Category),
            _ => Err(SummaryError::UnknownDimension(s.to_string())),
        }
    }
}

impl Serialize for Dimension {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Dimension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A breakdown bucket, rendered as `dimension:value` (e.g. `project:foo`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DimensionKey {
    pub dimension: Dimension,
    pub value: String,
}

impl DimensionKey {
    pub fn new(dimension: Dimension, value: impl Into<String>) -> Self {
        Self {
            dimension,
            value: value.into(),
        }
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dimension, self.value)
    }
}

impl FromStr for DimensionKey {
    type Err = SummaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((dimension, value)) = s.split_once(':') else {
            return Err(SummaryError::UnknownDimension(s.to_string()));
        };
        Ok(Self::new(dimension.parse()?, value))
    }
}

impl Serialize for DimensionKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DimensionKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_parses_case_insensitively() {
        assert_eq!("Project".parse::<Dimension>().unwrap(), Dimension::Project);
        assert_eq!(" machine ".parse::<Dimension>().unwrap(), Dimension::Machine);
    }

    #[test]
    fn unknown_dimension_is_rejected() {
        let err = "os".parse::<Dimension>().unwrap_err();
        assert_eq!(err, SummaryError::UnknownDimension("os".into()));
    }

    #[test]
    fn key_display_and_parse_agree() {
        let key = DimensionKey::new(Dimension::Project, "foo");
        assert_eq!(key.to_string(), "project:foo");
        assert_eq!("project:foo".parse::<DimensionKey>().unwrap(), key);
    }

    #[test]
    fn key_value_may_contain_colons() {
        let key: DimensionKey = "project:c:/work/foo".parse().unwrap();
        assert_eq!(key.value, "c:/work/foo");
    }

    #[test]
    fn keys_order_by_dimension_then_value() {
        let mut keys = vec![
            DimensionKey::new(Dimension::Language, "rust"),
            DimensionKey::new(Dimension::Project, "zeta"),
            DimensionKey::new(Dimension::Project, "alpha"),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["project:alpha", "project:zeta", "language:rust"]
        );
    }

    #[test]
    fn key_serializes_as_string() {
        let key = DimensionKey::new(Dimension::Editor, "helix");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"editor:helix\"");
    }
}
