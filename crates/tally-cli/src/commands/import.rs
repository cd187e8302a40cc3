//! Import command for loading heartbeats into the local `SQLite` store.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use rayon::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use tally_core::{AliasResolver, Heartbeat, IdentityId};
use tally_db::Database;

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Identity to attribute heartbeats to when a line names none.
    #[arg(long)]
    pub user: Option<String>,
}

/// Outcome of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub inserted: usize,
    pub duplicates: usize,
    pub malformed: usize,
    /// Parsed heartbeats dated outside years 0000 through 9999.
    pub out_of_range: usize,
}

/// Reads JSON lines from `reader` and stores them.
///
/// Malformed lines are skipped with a warning.
pub fn run<R: BufRead, W: Write>(
    reader: R,
    writer: &mut W,
    db: &Database,
    default_user: Option<&str>,
) -> Result<ImportStats> {
    let aliases = db
        .alias_resolver()
        .context("failed to load identity directory")?;
    let (heartbeats, malformed) = parse_heartbeats(reader, default_user, &aliases)?;
    let outcome = db
        .insert_heartbeats(&heartbeats)
        .context("failed to store heartbeats")?;

    let stats = ImportStats {
        inserted: outcome.inserted,
        duplicates: outcome.duplicates,
        malformed,
        out_of_range: outcome.out_of_range,
    };
    write!(
        writer,
        "Imported {} new heartbeats ({} duplicates, {} malformed lines skipped)",
        stats.inserted, stats.duplicates, stats.malformed
    )?;
    if stats.out_of_range > 0 {
        write!(writer, ", {} outside the supported time range", stats.out_of_range)?;
    }
    writeln!(writer)?;
    Ok(stats)
}

/// Parses non-empty lines in parallel, keeping input order.
///
/// Returns the heartbeats and the number of malformed lines.
fn parse_heartbeats<R: BufRead>(
    reader: R,
    default_user: Option<&str>,
    aliases: &AliasResolver,
) -> Result<(Vec<Heartbeat>, usize)> {
    let mut lines = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        if !line.trim().is_empty() {
            lines.push((idx + 1, line));
        }
    }

    let parsed: Vec<Option<Heartbeat>> = lines
        .par_iter()
        .map(|(number, line)| match parse_line(line, default_user, aliases) {
            Ok(heartbeat) => Some(heartbeat),
            Err(err) => {
                tracing::warn!(line = number, error = %format!("{err:#}"), "skipping malformed heartbeat");
                None
            }
        })
        .collect();

    let malformed = parsed.iter().filter(|hb| hb.is_none()).count();
    Ok((parsed.into_iter().flatten().collect(), malformed))
}

fn parse_line(line: &str, default_user: Option<&str>, aliases: &AliasResolver) -> Result<Heartbeat> {
    let parsed: ImportHeartbeat = serde_json::from_str(line.trim()).context("invalid JSON")?;
    parsed.into_heartbeat(default_user, aliases)
}

/// One line of input.
///
/// Accepts `timestamp` as RFC 3339 or WakaTime's `time` in fractional
/// seconds since the epoch.
#[derive(Debug, Deserialize)]
struct ImportHeartbeat {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    time: Option<f64>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    editor: Option<String>,
    #[serde(default)]
    machine: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

impl ImportHeartbeat {
    fn into_heartbeat(self, default_user: Option<&str>, aliases: &AliasResolver) -> Result<Heartbeat> {
        let user = self
            .user
            .as_deref()
            .filter(|user| !user.trim().is_empty())
            .or(default_user)
            .ok_or_else(|| anyhow::anyhow!("missing user"))?;
        // Known names resolve through aliases; unknown ones become new identities.
        let identity = match aliases.canonicalize(user) {
            Ok(identity) => identity,
            Err(_) => IdentityId::new(user)?,
        };

        let timestamp = match (self.timestamp.as_deref(), self.time) {
            (Some(raw), _) => DateTime::parse_from_rfc3339(raw.trim())
                .with_context(|| format!("invalid timestamp: {raw}"))?
                .with_timezone(&Utc),
            (None, Some(seconds)) => from_epoch_seconds(seconds)?,
            (None, None) => anyhow::bail!("missing timestamp"),
        };

        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Heartbeat {
            id,
            identity,
            timestamp,
            project: self.project,
            language: self.language,
            editor: self.editor,
            machine: self.machine,
            category: self.category,
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn from_epoch_seconds(seconds: f64) -> Result<DateTime<Utc>> {
    let millis = (seconds * 1_000.0).round();
    if !millis.is_finite() || millis.abs() > 1e15 {
        anyhow::bail!("time out of range: {seconds}");
    }
    DateTime::from_timestamp_millis(millis as i64)
        .ok_or_else(|| anyhow::anyhow!("time out of range: {seconds}"))
}
