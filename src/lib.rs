//! # hashlist-consolidator
//!
//! Background service that keeps one deduplicated "common" hashlist per hash
//! algorithm, holding every still-uncracked hash of that algorithm across all
//! uploaded hashlists, and exports it to a flat file for cracking workers.
//!
//! ## Flow
//!
//! ```text
//! scheduler loop ─> selector ─> analyzer (counts, common list lookup)
//!                      │
//!                      └─ candidate? ─> builder (claim, purge, export, hand off)
//! ```
//!
//! All coordination with the dispatcher and the result ingester goes through
//! status columns in the shared store; see [`db::HashlistStatus`].

pub mod analyzer;
pub mod builder;
pub mod config;
pub mod db;
pub mod scheduler;
pub mod selector;
pub mod store;

pub use builder::DELIMITER;
pub use config::SchedulerConfig;
pub use scheduler::{CycleOutcome, Scheduler, SchedulerHandle};
pub use store::HashStore;
