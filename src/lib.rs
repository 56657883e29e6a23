//! condaprov: provision an ephemeral conda environment as explicit steps.
//!
//! Fetch the Miniconda installer, install it in batch mode, activate the
//! environment, install a channel's packages against a pinned interpreter,
//! upgrade the numerical stack. Each step is planned against a lock file,
//! rendered as purified bash, run through a transport, and recorded in a
//! JSONL provenance log.

pub mod cli;
pub mod core;
pub mod error;
pub mod logging;
pub mod provenance;
pub mod resources;
pub mod transport;
