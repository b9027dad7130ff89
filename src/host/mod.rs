//! Pass-through host queries.
//!
//! Environment, working directory, entropy, clock, identity of the
//! executable and host. Each is one OS call with its error classified.

mod exe;

use std::backtrace::Backtrace;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::unistd::{self, User};

use crate::error::{ErrorKind, Result};

pub use exe::executable_path;

/// `getentropy` refuses requests larger than this.
const ENTROPY_CHUNK: usize = 256;

/// Value of the environment variable `name`, if set and valid UTF-8.
pub fn get_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Set `name` to `value`. With `overwrite` false an existing value is kept.
pub fn set_env(name: &str, value: &str, overwrite: bool) -> Result<()> {
    if name.is_empty() || name.contains('=') || name.contains('\0') || value.contains('\0') {
        return Err(ErrorKind::InvalidArgument);
    }
    if !overwrite && std::env::var_os(name).is_some() {
        return Ok(());
    }
    std::env::set_var(name, value);
    Ok(())
}

pub fn unset_env(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('=') || name.contains('\0') {
        return Err(ErrorKind::InvalidArgument);
    }
    std::env::remove_var(name);
    Ok(())
}

pub fn current_working_directory() -> Result<PathBuf> {
    Ok(unistd::getcwd()?)
}

pub fn change_directory(path: &Path) -> Result<()> {
    Ok(unistd::chdir(path)?)
}

/// `len` bytes from the kernel entropy pool.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    for chunk in buf.chunks_mut(ENTROPY_CHUNK) {
        // SAFETY: chunk is valid for writes of chunk.len() <= 256 bytes.
        let ret = unsafe { libc::getentropy(chunk.as_mut_ptr().cast(), chunk.len()) };
        Errno::result(ret)?;
    }
    Ok(buf)
}

/// Wall-clock time as (seconds, microseconds) since the Unix epoch.
pub fn now() -> (i64, i64) {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_secs() as i64, i64::from(d.subsec_micros())))
        .unwrap_or((0, 0))
}

/// Symbol lines of the current call stack, at most `max_frames` of them.
pub fn capture_backtrace(max_frames: usize) -> Vec<String> {
    let rendered = Backtrace::force_capture().to_string();

    rendered
        .lines()
        .map(str::trim_start)
        .filter_map(|line| {
            let (index, symbol) = line.split_once(": ")?;
            index.parse::<usize>().ok()?;
            Some(symbol.to_string())
        })
        .take(max_frames)
        .collect()
}

pub fn hostname() -> Result<OsString> {
    Ok(unistd::gethostname()?)
}

/// Home directory of the current user from the password database, falling
/// back to `$HOME`.
pub fn home_dir() -> Option<PathBuf> {
    match User::from_uid(unistd::getuid()) {
        Ok(Some(user)) => Some(user.dir),
        _ => std::env::var_os("HOME").map(PathBuf::from),
    }
}
