//! ttyctl - terminal, lock, signal and process control for Unix
//!
//! The primitives an interactive shell or multiplexer needs underneath it:
//!
//! - **Raw mode**: switch a terminal descriptor to raw mode and back, with
//!   a snapshot that restores it exactly ([`core::term`])
//! - **File locks**: non-blocking advisory whole-file locks and owner
//!   queries ([`core::lock`])
//! - **Signals**: named signal numbers, delivery, dispositions
//!   ([`core::signal`])
//! - **Processes**: pid, parent pid, exit ([`core::process`])
//!
//! Every fallible call returns [`ErrorKind`], the classified `errno` of the
//! call that failed.
//!
//! # Example
//!
//! ```no_run
//! use std::os::fd::AsFd;
//! use ttyctl::core::term::RawMode;
//!
//! let stdin = std::io::stdin();
//! let raw = RawMode::enter(stdin.as_fd())?;
//! // ... read keys ...
//! raw.restore()?;
//! # Ok::<(), ttyctl::ErrorKind>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod host;

pub use crate::error::{classify, ErrorKind, Result};
