//! Supa CLI - Local development tooling for managed Postgres.
//!
//! This crate provides the `supa` binary: diffing the local database
//! against the migrations directory, creating and listing migrations,
//! and pushing them to a remote database.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
