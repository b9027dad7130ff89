//! Advisory whole-file locking
//!
//! Locks are POSIX record locks (`fcntl(F_SETLK)`) spanning the whole file.
//! They belong to the calling process and are dropped by the kernel when
//! the locking descriptor is closed or the process exits. There is no
//! explicit unlock; [`LockGuard`] owns the descriptor and closes it.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};
use tracing::{debug, info};

use crate::core::process::ProcessId;
use crate::error::{ErrorKind, Result};

/// Whole-file write lock request starting at offset 0.
fn whole_file_request() -> libc::flock {
    // SAFETY: flock is a plain C struct; all-zero is a valid bit pattern and
    // leaves any platform-specific extra fields cleared.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = libc::F_WRLCK as _;
    fl.l_whence = libc::SEEK_SET as _;
    fl.l_start = 0;
    fl.l_len = 0; // to end of file, however it grows
    fl.l_pid = 0;
    fl
}

/// Attempt a non-blocking exclusive lock on the whole file behind `fd`.
///
/// Fails with [`ErrorKind::ResourceBusy`] when another process holds a
/// conflicting lock. POSIX allows either `EAGAIN` or `EACCES` for that case,
/// both are reported as busy.
pub fn try_lock<Fd: AsFd>(fd: Fd) -> Result<()> {
    let raw = fd.as_fd().as_raw_fd();
    let request = whole_file_request();

    match fcntl(raw, FcntlArg::F_SETLK(&request)) {
        Ok(_) => {
            debug!("locked fd {}", raw);
            Ok(())
        }
        Err(Errno::EAGAIN) | Err(Errno::EACCES) => {
            debug!("fd {} is locked by another process", raw);
            Err(ErrorKind::ResourceBusy)
        }
        Err(e) => Err(e.into()),
    }
}

/// Report which process holds a lock conflicting with a whole-file write
/// lock on `fd`, without acquiring anything.
///
/// Locks held by the calling process never conflict with its own requests,
/// so they are reported as `None`.
pub fn lock_owner<Fd: AsFd>(fd: Fd) -> Result<Option<ProcessId>> {
    let raw = fd.as_fd().as_raw_fd();
    let mut probe = whole_file_request();

    fcntl(raw, FcntlArg::F_GETLK(&mut probe))?;

    if probe.l_type == libc::F_UNLCK as libc::c_short {
        return Ok(None);
    }
    Ok(Some(ProcessId::from_raw(probe.l_pid)))
}

/// An advisory lock held for as long as this value lives.
///
/// Dropping the guard closes the file, which is what releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
}

impl LockGuard {
    /// Take ownership of `file` and lock it.
    ///
    /// On failure the file is dropped (closed) together with the error.
    pub fn acquire(file: File) -> Result<Self> {
        try_lock(&file)?;
        Ok(Self { file })
    }

    /// Open (creating if needed) and lock the file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        Self::acquire(file)
    }

    /// The locked file.
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl AsFd for LockGuard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

/// Outcome of a single-instance check.
#[derive(Debug)]
pub enum SingleInstance {
    /// This process now holds the lock.
    Acquired(LockGuard),
    /// Another process holds it. `pid` is `None` if it let go between the
    /// failed attempt and the owner query.
    AlreadyRunning { pid: Option<ProcessId> },
}

impl SingleInstance {
    /// Lock `path`, or find out who holds it.
    pub fn check(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;

        match try_lock(&file) {
            Ok(()) => {
                info!("acquired instance lock {}", path.display());
                Ok(SingleInstance::Acquired(LockGuard { file }))
            }
            Err(ErrorKind::ResourceBusy) => {
                let pid = lock_owner(&file)?;
                info!("instance lock {} held by {:?}", path.display(), pid);
                Ok(SingleInstance::AlreadyRunning { pid })
            }
            Err(e) => Err(e),
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    // F_WRLCK needs a descriptor open for writing
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlocked_file_has_no_owner() {
        let file = tempfile::tempfile().unwrap();
        assert_eq!(lock_owner(&file).unwrap(), None);
    }

    #[test]
    fn test_own_lock_is_not_reported_as_conflict() {
        let file = tempfile::tempfile().unwrap();
        try_lock(&file).unwrap();
        assert_eq!(lock_owner(&file).unwrap(), None);

        // Record locks are per process: relocking from here succeeds
        try_lock(&file).unwrap();
    }

    #[test]
    fn test_lock_owner_does_not_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.lock");
        let file = open_lock_file(&path).unwrap();

        assert_eq!(lock_owner(&file).unwrap(), None);
        assert_eq!(lock_owner(&file).unwrap(), None);
    }

    #[test]
    fn test_read_only_descriptor_cannot_take_write_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.lock");
        std::fs::write(&path, b"").unwrap();

        let file = File::open(&path).unwrap();
        assert_eq!(try_lock(&file), Err(ErrorKind::BadDescriptor));
    }

    #[test]
    fn test_owner_query_on_read_only_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro-owner.lock");
        std::fs::write(&path, b"").unwrap();

        let file = File::open(&path).unwrap();
        assert_eq!(lock_owner(&file).unwrap(), None);
    }

    #[test]
    fn test_single_instance_acquires_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instance.lock");

        match SingleInstance::check(&path).unwrap() {
            SingleInstance::Acquired(guard) => {
                assert!(path.exists());
                assert_eq!(lock_owner(&guard).unwrap(), None);
            }
            SingleInstance::AlreadyRunning { pid } => {
                panic!("unexpected owner {:?}", pid)
            }
        }
    }

    #[test]
    fn test_guard_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested.lock");
        let guard = LockGuard::open(&path).unwrap();
        assert!(guard.file().metadata().unwrap().is_file());
    }
}
