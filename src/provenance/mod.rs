//! Provenance: BLAKE3 hashing, event log, environment verification.

pub mod eventlog;
pub mod hasher;
pub mod verify;
