//! Core engine logic — types, parsing, resolution, retry, dispatch, execution.

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod parser;
pub mod resolver;
pub mod retry;
pub mod types;
