//! End-to-end digest run.
//!
//! Store → normalize → filter chain → prompt → model → report file. The store
//! is closed before the model is called, and the report file is only written
//! after a successful analysis.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::analysis::{Analysis, Analyzer, AnalyzerOptions, ChatClient};
use crate::filter::{self, FilterOptions};
use crate::report;
use crate::store::{MessageQuery, StoreOptions, StoreReader};
use crate::types::{AccountHandle, CanonicalMessage, Contact, RoomDescriptor};
use crate::window::TimeWindow;
use crate::{Error, Result};

/// Which store file to read.
#[derive(Debug, Clone)]
pub enum StoreSource {
    /// A discovered account; the store file is located inside it
    Account(AccountHandle),
    /// An explicit store file
    File(PathBuf),
}

/// Everything a run needs, resolved up front.
#[derive(Debug, Clone)]
pub struct DigestPlan {
    pub source: StoreSource,
    pub store: StoreOptions,
    /// Room ids or name fragments
    pub targets: Vec<String>,
    pub window: TimeWindow,
    pub filter: FilterOptions,
    pub analyzer: AnalyzerOptions,
    pub output_dir: PathBuf,
    /// Report file name; defaults to [`report::default_filename`]
    pub output_name: Option<String>,
}

/// Progress notifications for interactive callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestStage {
    Reading { rooms: usize },
    /// The store connection has been released; no store access follows
    StoreClosed,
    Analyzing { messages: usize },
    Writing,
}

/// A written report.
#[derive(Debug, Clone)]
pub struct DigestReport {
    pub path: PathBuf,
    pub rooms: Vec<RoomDescriptor>,
    /// Messages sent to the model after filtering
    pub message_count: usize,
    pub analysis: Analysis,
}

#[derive(Debug, Clone)]
pub enum DigestOutcome {
    /// Nothing survived the filter chain; no model call, no report
    NoMessages { rooms: Vec<RoomDescriptor> },
    Written(DigestReport),
}

pub fn run(plan: &DigestPlan, client: &dyn ChatClient, generated_at: DateTime<Utc>) -> Result<DigestOutcome> {
    run_with_progress(plan, client, generated_at, |_| {})
}

/// Like [`run`], reporting each stage to `progress`.
pub fn run_with_progress<F>(
    plan: &DigestPlan,
    client: &dyn ChatClient,
    generated_at: DateTime<Utc>,
    mut progress: F,
) -> Result<DigestOutcome>
where
    F: FnMut(DigestStage),
{
    let mut reader = match &plan.source {
        StoreSource::Account(account) => StoreReader::open(account, &plan.store)?,
        StoreSource::File(path) => StoreReader::open_path(path, &plan.store)?,
    };
    let collected = collect(&reader, plan, &mut progress);
    reader.close()?;
    progress(DigestStage::StoreClosed);
    let (rooms, messages) = collected?;

    let options = FilterOptions {
        rooms: Some(rooms.iter().map(|r| r.id.clone()).collect()),
        ..plan.filter.clone()
    };
    let fetched = messages.len();
    let messages = filter::apply(messages, &plan.window, &options);
    tracing::info!(
        rooms = rooms.len(),
        fetched,
        kept = messages.len(),
        window = %plan.window.format_range(),
        "Collected messages"
    );

    if messages.is_empty() {
        tracing::info!("No messages in window, skipping analysis");
        return Ok(DigestOutcome::NoMessages { rooms });
    }

    progress(DigestStage::Analyzing {
        messages: messages.len(),
    });
    let analysis = Analyzer::new(client, plan.analyzer).analyze(&messages, &plan.window)?;

    progress(DigestStage::Writing);
    let body = report::render(&analysis.result, &plan.window, generated_at);
    let name = plan
        .output_name
        .clone()
        .unwrap_or_else(|| report::default_filename(&plan.window));
    let path = report::write_report(&plan.output_dir, &name, &body)?;

    Ok(DigestOutcome::Written(DigestReport {
        path,
        rooms,
        message_count: messages.len(),
        analysis,
    }))
}

/// Resolve target rooms and read their messages in the window.
fn collect<F>(
    reader: &StoreReader,
    plan: &DigestPlan,
    progress: &mut F,
) -> Result<(Vec<RoomDescriptor>, Vec<CanonicalMessage>)>
where
    F: FnMut(DigestStage),
{
    let rooms = resolve_rooms(&reader.list_rooms(), &plan.targets)?;
    progress(DigestStage::Reading { rooms: rooms.len() });

    let types = plan.filter.types.clone().unwrap_or_default();
    let mut messages = Vec::new();
    for room in &rooms {
        let query = MessageQuery::new()
            .room(room.id.clone())
            .between(plan.window.start(), plan.window.end())
            .types(&types)
            .limit(plan.filter.max_messages);
        let fetched = reader.fetch_messages(&query)?;
        tracing::debug!(room = %room.id, count = fetched.len(), "Fetched room messages");
        messages.extend(fetched);
    }

    let contacts = reader.list_contacts();
    resolve_senders(&mut messages, &contacts);
    Ok((rooms, messages))
}

/// Match targets against listed rooms by id or name fragment.
///
/// A target that matches no listed room is used as a literal room id, since
/// room tables are sometimes missing while messages are still readable.
pub fn resolve_rooms(listed: &[RoomDescriptor], targets: &[String]) -> Result<Vec<RoomDescriptor>> {
    let targets: Vec<&str> = targets
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if targets.is_empty() {
        return Err(Error::Config(
            "no target rooms given; pass --room or set rooms.targets (see --list-rooms)".to_string(),
        ));
    }

    let mut selected: Vec<RoomDescriptor> = Vec::new();
    for target in targets {
        let matched: Vec<&RoomDescriptor> = listed.iter().filter(|r| r.matches(target)).collect();
        if matched.is_empty() {
            tracing::warn!(target, "No listed room matches target, using it as a room id");
            push_unique(
                &mut selected,
                RoomDescriptor {
                    id: target.to_string(),
                    ..Default::default()
                },
            );
        } else {
            for room in matched {
                push_unique(&mut selected, room.clone());
            }
        }
    }
    Ok(selected)
}

fn push_unique(rooms: &mut Vec<RoomDescriptor>, room: RoomDescriptor) {
    if !rooms.iter().any(|r| r.id == room.id) {
        rooms.push(room);
    }
}

/// Replace raw sender ids with contact names where the contact is known.
fn resolve_senders(messages: &mut [CanonicalMessage], contacts: &[Contact]) {
    if contacts.is_empty() {
        return;
    }
    let names: HashMap<&str, &str> = contacts.iter().map(|c| (c.id.as_str(), c.label())).collect();
    for message in messages.iter_mut() {
        if let Some(name) = names.get(message.sender.as_str()) {
            message.sender = (*name).to_string();
        }
    }
}
