//! # wxdigest-core
//!
//! Core library for wxdigest - daily topic digests of chat groups.
//!
//! This library provides:
//! - Read-only access to the local chat store, across schema versions
//! - Message normalization and the filter chain
//! - Topic extraction through an OpenAI-compatible language model
//! - Markdown report rendering
//! - Configuration management and logging
//!
//! ## Pipeline
//!
//! Store reader → normalizer → filter chain → prompt builder → analysis
//! client → report renderer. [`digest::run`] drives the whole pipeline.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wxdigest_core::analysis::HttpChatClient;
//! use wxdigest_core::digest::{self, DigestPlan, StoreSource};
//! use wxdigest_core::store::StoreOptions;
//! use wxdigest_core::{Config, TimeWindow};
//!
//! let config = Config::load().expect("failed to load config");
//! let llm = config.llm.resolve().expect("no provider configured");
//! let client = HttpChatClient::new(&llm).expect("failed to build client");
//! let tz = config.output.tz().expect("bad time zone");
//!
//! let plan = DigestPlan {
//!     source: StoreSource::File("MSG.db".into()),
//!     store: StoreOptions::default(),
//!     targets: vec!["US stocks".to_string()],
//!     window: TimeWindow::yesterday(chrono::Utc::now(), tz).unwrap(),
//!     filter: config.filter.to_options(),
//!     analyzer: (&llm).into(),
//!     output_dir: config.output.dir.clone(),
//!     output_name: None,
//! };
//! let outcome = digest::run(&plan, &client, chrono::Utc::now()).expect("digest failed");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use store::{discover_accounts, StoreReader};
pub use types::*;
pub use window::TimeWindow;

// Public modules
pub mod analysis;
pub mod config;
pub mod digest;
pub mod error;
pub mod filter;
pub mod logging;
pub mod normalize;
pub mod report;
pub mod store;
pub mod types;
pub mod window;
