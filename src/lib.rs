//! BkSync - Binary Delta Synchronization
//!
//! Lets a client ship a new version of a large file as the difference
//! against a version the receiver already holds. A rolling-checksum block
//! matcher finds the reusable blocks of the base file, the result is written
//! in the self-describing BD format, and patching rebuilds the new file and
//! verifies it against the MD5 the delta carries.

pub mod bd;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod format;
pub mod gate;
pub mod signature;

pub use config::Config;
pub use engine::{delta, delta_with_options, delta_with_signature, inspect, patch};
pub use engine::{DeltaFile, DeltaOptions, DeltaSummary, ReconstructedFile};
pub use error::{Error, Result};
pub use gate::{RatioGate, Transfer};
