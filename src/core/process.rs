//! Process identity and termination

use std::fmt;

use nix::unistd::{self, Pid};
use tracing::info;

/// A process id as reported by the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(i32);

impl ProcessId {
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Pid> for ProcessId {
    fn from(pid: Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl From<ProcessId> for Pid {
    fn from(pid: ProcessId) -> Self {
        Pid::from_raw(pid.0)
    }
}

impl From<u32> for ProcessId {
    /// From `std::process::Child::id`.
    fn from(pid: u32) -> Self {
        Self(pid as i32)
    }
}

/// Pid and parent pid, read together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub pid: ProcessId,
    pub parent: ProcessId,
}

/// Id of the calling process. Queried every time.
pub fn current_pid() -> ProcessId {
    unistd::getpid().into()
}

/// Id of the parent process. Changes if the parent exits and the process
/// is reparented.
pub fn parent_pid() -> ProcessId {
    unistd::getppid().into()
}

pub fn identity() -> ProcessIdentity {
    ProcessIdentity {
        pid: current_pid(),
        parent: parent_pid(),
    }
}

/// Exit the process with `code`.
///
/// Destructors of live values do not run. Restore terminals and release
/// guards before calling this.
pub fn terminate(code: i32) -> ! {
    info!("terminating with status {}", code);
    std::process::exit(code)
}
