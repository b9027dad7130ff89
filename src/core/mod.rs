//! Core process, terminal and file-resource primitives.
//!
//! - **lock**: advisory whole-file locks and lock owner queries
//! - **term**: raw/canonical terminal mode transitions and window size
//! - **signal**: signal catalog, delivery and dispositions
//! - **process**: process identity and termination
//!
//! # Architecture
//!
//! ```text
//! session manager (caller)
//! ├── term::RawMode      (restores the terminal on drop)
//! ├── lock::LockGuard    (closes the descriptor on drop)
//! ├── signal             (kill / signal dispositions)
//! └── process            (getpid / getppid / exit)
//! ```
//!
//! Descriptors passed as `AsFd` are borrowed: nothing here closes them,
//! except the guard types that own theirs.

pub mod lock;
pub mod process;
pub mod signal;
pub mod term;
