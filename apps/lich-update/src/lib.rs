#![warn(clippy::pedantic)]

//! Self-update, snapshot and rollback manager for Lich5 installations.
//!
//! ## Module Structure
//!
//! - [`request`] - Parsing operator requests
//! - [`commands`] - The [`commands::Updater`] service and its request handlers
//! - [`engine`] - Resolution, fetch, verify, apply and rollback
//! - [`config`] - TOML configuration with built-in defaults
//! - [`lock`] - Exclusive installation lock
//! - [`report`] - Operator output and confirmation
//! - [`errors`] - Typed failure kinds and their exit codes

pub mod commands;
pub mod config;
pub mod engine;
pub mod errors;
pub mod lock;
pub mod report;
pub mod request;
