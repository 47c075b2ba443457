//! wxdigest - daily topic digest of chat groups
//!
//! Reads one day (or range) of messages from the local chat store, asks a
//! language model for the topics and stocks discussed, and writes a Markdown
//! report.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/wxdigest/wxdigest.log (~/.local/state/wxdigest/wxdigest.log)
//! - Config: $XDG_CONFIG_HOME/wxdigest/config.toml (~/.config/wxdigest/config.toml)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use wxdigest_core::analysis::HttpChatClient;
use wxdigest_core::digest::{self, DigestOutcome, DigestPlan, DigestStage, StoreSource};
use wxdigest_core::store::StoreOptions;
use wxdigest_core::window::Tz;
use wxdigest_core::{discover_accounts, Config, Error, StoreReader, TimeWindow};

#[derive(Parser)]
#[command(name = "wxdigest")]
#[command(about = "Summarize chat group discussions with a language model")]
#[command(version)]
struct Args {
    /// Room id or name fragment (repeatable); defaults to rooms.targets
    #[arg(short, long = "room")]
    rooms: Vec<String>,

    /// Summarize one day (YYYY-MM-DD)
    #[arg(short, long, group = "when")]
    date: Option<String>,

    /// Summarize today
    #[arg(short, long, group = "when")]
    today: bool,

    /// Summarize yesterday (default)
    #[arg(short, long, group = "when")]
    yesterday: bool,

    /// Summarize this week, Monday to now
    #[arg(short, long, group = "when")]
    week: bool,

    /// Summarize the last N days up to now
    #[arg(long, group = "when", value_name = "N")]
    days: Option<u32>,

    /// First day of a custom range (YYYY-MM-DD)
    #[arg(long, group = "when", requires = "to")]
    from: Option<String>,

    /// Last day of a custom range (YYYY-MM-DD)
    #[arg(long, requires = "from")]
    to: Option<String>,

    /// List rooms in the store and exit
    #[arg(short, long)]
    list_rooms: bool,

    /// List accounts under the data directory and exit
    #[arg(long)]
    list_accounts: bool,

    /// Report file name (written to output.dir)
    #[arg(short, long)]
    output: Option<String>,

    /// Account directory name to read
    #[arg(long)]
    wxid: Option<String>,

    /// Explicit store file; skips account discovery
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// How to cap long windows: recent, oldest or sample
    #[arg(long)]
    strategy: Option<String>,

    /// Maximum messages sent to the model
    #[arg(long)]
    max_messages: Option<usize>,

    /// Print the effective configuration (keys masked) and exit
    #[arg(long)]
    show_config: bool,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(&args).context("failed to load configuration")?;
    apply_args(&mut config, &args);

    let _log_guard =
        wxdigest_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("wxdigest starting");

    if args.show_config {
        println!("{}", config.redacted_summary());
        return Ok(());
    }

    if args.list_accounts {
        return list_accounts(&config);
    }

    let source = resolve_source(&config)?;

    if args.list_rooms {
        return list_rooms(&config, &source);
    }

    let tz = config.output.tz()?;
    let window = resolve_window(&args, tz)?;

    let targets = if args.rooms.is_empty() {
        config.rooms.targets.clone()
    } else {
        args.rooms.clone()
    };
    if targets.is_empty() {
        bail!("No target rooms. Pass --room NAME or set rooms.targets; run with --list-rooms to see available rooms.");
    }

    let llm = config.llm.resolve()?;
    let client = HttpChatClient::new(&llm).context("failed to create LLM client")?;

    println!("Time range: {}", window.format_range());
    println!("Target rooms: {}", targets.join(", "));

    let plan = DigestPlan {
        source,
        store: store_options(&config),
        targets,
        window,
        filter: config.filter.to_options(),
        analyzer: (&llm).into(),
        output_dir: config.output.dir.clone(),
        output_name: args.output.clone(),
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .context("invalid spinner template")?,
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let model_label = format!("{} ({})", llm.provider.as_str(), llm.model);
    let outcome = digest::run_with_progress(&plan, &client, Utc::now(), |stage| match stage {
        DigestStage::Reading { rooms } => {
            spinner.set_message(format!("Reading messages from {} room(s)...", rooms))
        }
        DigestStage::StoreClosed => {}
        DigestStage::Analyzing { messages } => spinner.set_message(format!(
            "Analyzing {} messages with {}...",
            messages, model_label
        )),
        DigestStage::Writing => spinner.set_message("Writing report..."),
    });
    spinner.finish_and_clear();

    match outcome.map_err(explain)? {
        DigestOutcome::NoMessages { rooms } => {
            let names: Vec<_> = rooms.iter().map(|r| r.label().to_string()).collect();
            println!(
                "No matching messages in {} for {}.",
                window.format_range(),
                names.join(", ")
            );
            tracing::info!("No messages, nothing to summarize");
        }
        DigestOutcome::Written(report) => {
            println!(
                "Analyzed {} messages with {}",
                report.message_count, model_label
            );
            println!("Topics: {}", report.analysis.result.topics.len());
            if let Some(usage) = report.analysis.usage {
                println!("Tokens used: {}", usage.total_tokens);
            }
            println!("Report saved: {}", report.path.display());
            tracing::info!(path = %report.path.display(), "wxdigest complete");
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> wxdigest_core::Result<Config> {
    match &args.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => Config::load(),
    }
}

/// Command-line flags win over file and environment values.
fn apply_args(config: &mut Config, args: &Args) {
    if let Some(db) = &args.db {
        config.store.db_path = Some(db.clone());
    }
    if let Some(wxid) = &args.wxid {
        config.store.account = Some(wxid.clone());
    }
    if let Some(strategy) = &args.strategy {
        config.filter.cap_strategy = strategy.clone();
    }
    if let Some(max) = args.max_messages {
        config.filter.max_messages = max;
    }
}

fn store_options(config: &Config) -> StoreOptions {
    StoreOptions {
        query_timeout: config.store.query_timeout(),
    }
}

fn resolve_source(config: &Config) -> Result<StoreSource> {
    if let Some(path) = &config.store.db_path {
        return Ok(StoreSource::File(path.clone()));
    }

    let accounts = discover_accounts(&config.store.data_dir)?;
    if accounts.is_empty() {
        bail!(
            "No chat accounts found under {}. Make sure the desktop client has logged in at least once, or pass --db.",
            config.store.data_dir.display()
        );
    }

    let account = match &config.store.account {
        Some(wxid) => accounts
            .into_iter()
            .find(|a| &a.id == wxid)
            .with_context(|| format!("account '{}' not found (see --list-accounts)", wxid))?,
        None => {
            if accounts.len() > 1 {
                tracing::info!(count = accounts.len(), "Several accounts found, using the first");
                println!(
                    "Found {} accounts, using {} (choose with --wxid)",
                    accounts.len(),
                    accounts[0].id
                );
            }
            accounts.into_iter().next().context("no account available")?
        }
    };
    tracing::info!(account = %account.id, "Using account");
    Ok(StoreSource::Account(account))
}

fn open_store(config: &Config, source: &StoreSource) -> Result<StoreReader> {
    let options = store_options(config);
    let reader = match source {
        StoreSource::Account(account) => StoreReader::open(account, &options),
        StoreSource::File(path) => StoreReader::open_path(path, &options),
    };
    reader.map_err(explain)
}

fn list_accounts(config: &Config) -> Result<()> {
    let accounts = discover_accounts(&config.store.data_dir)?;
    if accounts.is_empty() {
        println!("No accounts found under {}", config.store.data_dir.display());
        return Ok(());
    }
    println!("Found {} account(s):", accounts.len());
    for account in &accounts {
        println!("  {}  {}", account.id, account.path.display());
    }
    Ok(())
}

fn list_rooms(config: &Config, source: &StoreSource) -> Result<()> {
    let mut reader = open_store(config, source)?;
    let rooms = reader.list_rooms();
    reader.close()?;

    if rooms.is_empty() {
        println!("No rooms found in {}", reader.path().display());
        return Ok(());
    }
    println!("Found {} room(s):\n", rooms.len());
    for (i, room) in rooms.iter().enumerate() {
        println!("  [{:2}] {}", i + 1, room.label());
        println!("       ID: {}", room.id);
    }
    Ok(())
}

fn resolve_window(args: &Args, tz: Tz) -> Result<TimeWindow> {
    let now = Utc::now();
    let window = if let Some(date) = &args.date {
        TimeWindow::specific_date(date, tz)?
    } else if args.today {
        TimeWindow::today(now, tz)?
    } else if args.week {
        TimeWindow::this_week(now, tz)?
    } else if let Some(days) = args.days {
        TimeWindow::last_n_days(days, now, tz)?
    } else if let (Some(from), Some(to)) = (&args.from, &args.to) {
        TimeWindow::custom(from, to, tz)?
    } else {
        TimeWindow::yesterday(now, tz)?
    };
    Ok(window)
}

/// Attach a hint for errors the user can act on.
fn explain(err: Error) -> anyhow::Error {
    let hint = match &err {
        Error::StoreEncrypted { .. } => Some(
            "The store is encrypted. Decrypt it with an external key tool and pass the result with --db."
                .to_string(),
        ),
        Error::StoreNotFound(_) => Some(
            "Back up chat history to this computer in the desktop client, or pass --db.".to_string(),
        ),
        Error::Provider(_) => Some(format!(
            "The language model call failed; details are in {}",
            wxdigest_core::logging::log_file_path().display()
        )),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => anyhow::Error::new(err),
    }
}
