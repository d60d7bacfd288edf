//! # Intent log testkit
//!
//! Test utilities for the intent log crates.
//!
//! This crate provides:
//! - Pools, logs and reference scenarios ([`fixtures`])
//! - Record constructors ([`records`])
//! - Property-based generators for every record type ([`generators`])
//! - A chain builder that can damage what it built ([`builder`])
//! - A replay target modelling a directory tree ([`model`])
//! - Crash recovery harness ([`crash`])
//! - Stress testing utilities ([`stress`])
//! - Byte-level layout vectors ([`vectors`])
//!
//! ## Usage
//!
//! ```rust
//! use zil_testkit::prelude::*;
//!
//! let scenario = scenarios::single_block();
//! let log = scenario.open();
//! let report = log.claim().unwrap();
//! assert_eq!(report.records_claimed, 3);
//!
//! let mut tree = TreeModel::new();
//! log.replay(&mut tree).unwrap();
//! assert_eq!(tree.lookup(4, "a.txt"), None);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod builder;
pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod model;
pub mod records;
pub mod stress;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::builder::*;
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::model::*;
    pub use crate::records;
    pub use crate::stress::*;
}

pub use builder::*;
pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use model::*;
pub use stress::*;
pub use vectors::*;
