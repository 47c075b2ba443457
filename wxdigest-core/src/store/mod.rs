//! Read-only access to the local chat store
//!
//! This module provides:
//! - Account discovery under the chat data root
//! - Store location and open (detecting encrypted files)
//! - Schema-variant probing for room, contact and message tables

pub mod reader;
pub mod schema;

pub use reader::{discover_accounts, MessageQuery, StoreOptions, StoreReader};
