//! Logging collector core.
//!
//! Reassembles chunk-framed log records arriving on a pipe from one or more
//! producer processes, routes each record to one of a fixed set of
//! destination logfiles, and rotates those logfiles by age, size, or
//! explicit request. See `SPEC_FULL.md` in the repository root for the full
//! module-by-module design.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod bridge;
pub mod collector;
pub mod config;
pub mod destination;
pub mod error;
#[cfg(feature = "multi-collector")]
pub mod fanout;
pub mod metainfo;
pub mod protocol;
pub mod reassembler;
pub mod retention;
pub mod rotation;
pub mod signals;

pub use crate::collector::Collector;
pub use crate::config::LoggerConfig;
pub use crate::destination::{Buffering, DestKind, DestinationRegistry};
pub use crate::error::{CollectorError, Result};
