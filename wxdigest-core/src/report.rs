//! Markdown report rendering and writing.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::types::{AnalysisResult, Topic};
use crate::window::TimeWindow;
use crate::Result;

const NO_INSTRUMENTS: &str = "*No instruments mentioned*";
const NOT_REPORTED: &str = "*Not reported*";

/// Render `result` as Markdown.
///
/// Output depends only on the arguments, so identical input renders
/// identically. `generated_at` is shown in the window's time zone.
pub fn render(result: &AnalysisResult, window: &TimeWindow, generated_at: DateTime<Utc>) -> String {
    let mut lines: Vec<String> = vec![
        "# Group Discussion Summary".to_string(),
        String::new(),
        format!("**Time range:** {}", window.format_bounds()),
        format!(
            "**Generated:** {}",
            generated_at.with_timezone(&window.tz()).format("%Y-%m-%d")
        ),
        String::new(),
        "## Overview".to_string(),
        format!(
            "{} {} discussed",
            result.topics.len(),
            if result.topics.len() == 1 { "topic" } else { "topics" }
        ),
        String::new(),
    ];

    for (idx, topic) in result.topics.iter().enumerate() {
        render_topic(&mut lines, idx + 1, topic);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn render_topic(lines: &mut Vec<String>, number: usize, topic: &Topic) {
    let title = if topic.title.trim().is_empty() {
        "Untitled topic"
    } else {
        topic.title.trim()
    };
    lines.push(format!("## Topic {}: {}", number, title));
    lines.push(String::new());

    if !topic.discussion.trim().is_empty() {
        lines.push("### Discussion".to_string());
        lines.push(topic.discussion.trim().to_string());
        lines.push(String::new());
    }

    if !topic.conclusion.trim().is_empty() {
        lines.push("### Conclusion".to_string());
        lines.push(topic.conclusion.trim().to_string());
        lines.push(String::new());
    }

    lines.push("### Instruments".to_string());
    match &topic.instruments {
        None => {
            lines.push(NOT_REPORTED.to_string());
            lines.push(String::new());
        }
        Some(instruments) if instruments.is_empty() => {
            lines.push(NO_INSTRUMENTS.to_string());
            lines.push(String::new());
        }
        Some(instruments) => {
            for instrument in instruments {
                let name = if instrument.name.trim().is_empty() {
                    "Unknown"
                } else {
                    instrument.name.trim()
                };
                let heading = match instrument.code.trim() {
                    "" => format!("**{}**", name),
                    code => format!("**{} {}**", name, code),
                };
                lines.push(heading);
                if !instrument.view.trim().is_empty() {
                    lines.push(format!("- {}", instrument.view.trim()));
                }
                lines.push(String::new());
            }
        }
    }
}

/// `summary_YYYY-MM-DD.md`, dated by the window's last local day.
pub fn default_filename(window: &TimeWindow) -> String {
    format!("summary_{}.md", window.local_end().format("%Y-%m-%d"))
}

/// Write `body` to `dir/name`, creating `dir` and appending `.md` if needed.
///
/// The body goes to a temporary sibling first and is renamed into place, so a
/// failed write never leaves a partial report.
pub fn write_report(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let file_name = if name.ends_with(".md") {
        name.to_string()
    } else {
        format!("{}.md", name)
    };
    let path = dir.join(file_name);
    let temp_path = path.with_extension("md.tmp");

    if let Err(e) = fs::write(&temp_path, body) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&temp_path, &path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    tracing::info!(path = %path.display(), bytes = body.len(), "Wrote report");
    Ok(path)
}
