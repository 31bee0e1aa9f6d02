//! Deskpilot — declarative desktop automation.
//!
//! YAML recipes of typed steps, validated up front and executed through
//! capability providers with bounded retries, post-action verification and
//! an append-only JSONL event log per run.

pub mod cli;
pub mod core;
pub mod journal;
pub mod providers;
