#![cfg_attr(docsrs, feature(doc_cfg))]
//! # enginemon_lib
//!
//! This crate decodes the binary telemetry frames sent by a serial-attached engine
//! monitoring controller and provides the small collaborators around it: a channel table
//! for presenting readings, a CSV recorder and serial frame readers.
//!
//! ## Features
//!
//! This crate uses a feature-based system to keep dependencies minimal.
//! The protocol core has no optional dependencies.
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `enginemon` command-line tool and pulls in `serialport` and `serde`.
//!
//! ### Reader Features
//! - `serialport`: Enables the **synchronous** frame reader using the `serialport` crate.
//! - `tokio-serial-async`: Enables the **asynchronous** frame reader using `tokio` and `tokio-serial`.
//!
//! ### Utility Features
//! - `serde`: Enables `serde` support for decoded messages, channel specs and port settings.
//! - `bin-dependencies`: Enables all features required by the `enginemon` binary executable.

/// Channel id to meaning mapping used by display consumers.
pub mod channel;
/// Contains error types for the library.
mod error;
/// CSV persistence of decoded messages.
pub mod persistence;
/// Defines the engine monitor frame protocol.
pub mod protocol;
/// Serial port parameters shared by the readers.
pub mod settings;

pub use error::Error;

/// Synchronous frame reader.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;

/// Asynchronous frame reader.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod tokio_serial_async;
