//! Journal — append-only execution log, artifact hashing and replay.

pub mod eventlog;
pub mod hasher;
pub mod replay;
