//! Summary command: tracked time for one identity over a window.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::Args;
use serde::Serialize;

use tally_core::{
    Aggregator, CURRENT, Dimension, Filter, IdentityId, Summary, SummaryRequest, SummaryService,
    Window, WindowSpec,
};
use tally_db::Database;

use super::util::{format_duration, parse_datetime, progress_bar, wakatime_text};
use crate::Config;

#[derive(Debug, Args)]
pub struct SummaryArgs {
    /// Identity to summarize ("current" for yourself).
    #[arg(default_value = CURRENT)]
    pub user: String,

    /// Start of the window (RFC 3339 or e.g. "2 days ago"). Defaults to all time.
    #[arg(long)]
    pub from: Option<String>,

    /// End of the window. Without it the window runs up to now.
    #[arg(long)]
    pub to: Option<String>,

    /// Only count time spent in this project.
    #[arg(long, conflicts_with = "filter")]
    pub project: Option<String>,

    /// Only count time matching `dimension=value` (e.g. `language=rust`).
    #[arg(long)]
    pub filter: Option<String>,

    /// Ignore cached summaries and aggregate from scratch.
    #[arg(long)]
    pub recompute: bool,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// WakaTime-compatible "all time since today" response.
#[derive(Debug, Serialize)]
pub struct AllTimeView {
    pub data: AllTimeData,
}

#[derive(Debug, Serialize)]
pub struct AllTimeData {
    pub total_seconds: f64,
    pub text: String,
    pub is_up_to_date: bool,
    pub range: RangeView,
}

#[derive(Debug, Serialize)]
pub struct RangeView {
    /// `None` for all-time windows.
    pub start: Option<String>,
    pub start_date: Option<String>,
    pub end: String,
    pub end_date: String,
    pub timezone: String,
}

impl AllTimeView {
    #[allow(clippy::cast_precision_loss)]
    pub fn new(summary: &Summary) -> Self {
        let window = summary.window;
        let start = (!window.is_all_time()).then_some(window.from);
        Self {
            data: AllTimeData {
                total_seconds: summary.total_ms as f64 / 1_000.0,
                text: wakatime_text(summary.total_ms),
                // Summaries are always brought up to date before rendering.
                is_up_to_date: true,
                range: RangeView {
                    start: start.map(format_instant),
                    start_date: start.map(format_date),
                    end: format_instant(window.to),
                    end_date: format_date(window.to),
                    timezone: "UTC".to_string(),
                },
            },
        }
    }
}

pub fn run<W: Write>(
    writer: &mut W,
    db: Database,
    config: &Config,
    requester: IdentityId,
    args: &SummaryArgs,
) -> Result<()> {
    let aliases = db
        .alias_resolver()
        .context("failed to load identity directory")?;
    let service = SummaryService::new(
        aliases,
        Aggregator::new(db, config.aggregation()),
        config.cache(),
    );

    let request = build_request(requester, args)?;
    let summary = service.query(&request).context("summary query failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&AllTimeView::new(&summary))?;
        writeln!(writer, "{json}")?;
    } else {
        write_summary(writer, &summary)?;
    }
    Ok(())
}

/// Decodes command-line arguments into a summary request.
///
/// `--to` makes the window fixed; without it the window is open-ended.
pub fn build_request(requester: IdentityId, args: &SummaryArgs) -> Result<SummaryRequest> {
    let from = args.from.as_deref().map(parse_datetime).transpose()?;
    let to = args.to.as_deref().map(parse_datetime).transpose()?;
    let window = match (from, to) {
        (from, Some(to)) => WindowSpec::Between(Window {
            from: from.unwrap_or(DateTime::<Utc>::MIN_UTC),
            to,
        }),
        (Some(from), None) => WindowSpec::Since(from),
        (None, None) => WindowSpec::all_time(),
    };

    // A blank project means no filter.
    let project = args
        .project
        .as_deref()
        .map(str::trim)
        .filter(|project| !project.is_empty());
    let filter = match (project, &args.filter) {
        (Some(project), _) => Some(Filter::new(Dimension::Project, project)),
        (None, Some(raw)) => Some(raw.parse::<Filter>().context("invalid --filter")?),
        (None, None) => None,
    };

    Ok(SummaryRequest::new(requester, args.user.clone(), window)
        .recompute(args.recompute)
        .filter(filter))
}

/// Writes the human-readable summary.
pub fn write_summary<W: Write>(writer: &mut W, summary: &Summary) -> Result<()> {
    writeln!(writer, "Summary for {}", summary.identity)?;
    let window = summary.window;
    if window.is_all_time() {
        writeln!(writer, "Range: all time until {}", format_readable(window.to))?;
    } else {
        writeln!(
            writer,
            "Range: {} to {}",
            format_readable(window.from),
            format_readable(window.to)
        )?;
    }
    writeln!(writer, "Total: {}", format_duration(summary.total_ms))?;

    if summary.breakdown.is_empty() {
        writeln!(writer)?;
        writeln!(writer, "No activity recorded.")?;
        return Ok(());
    }

    for dimension in &summary.dimensions {
        let ranked = summary.ranked(*dimension);
        if ranked.is_empty() {
            continue;
        }
        writeln!(writer)?;
        writeln!(writer, "{}", heading(*dimension))?;
        for (name, ms) in ranked {
            let duration = format_duration(ms);
            let bar = progress_bar(ms, summary.total_ms);
            writeln!(writer, "  {name:<20} {duration:>8}  {bar}")?;
        }
    }
    Ok(())
}

const fn heading(dimension: Dimension) -> &'static str {
    match dimension {
        Dimension::Project => "PROJECTS",
        Dimension::Language => "LANGUAGES",
        Dimension::Editor => "EDITORS",
        Dimension::Machine => "MACHINES",
        Dimension::Category => "CATEGORIES",
    }
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn format_date(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d").to_string()
}

fn format_readable(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
