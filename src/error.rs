//! Error model
//!
//! Every primitive in this crate reports failure as an [`ErrorKind`]: a
//! closed classification of the raw `errno` value returned by the OS call
//! that failed. The raw value is captured from the call's own result, never
//! read back later from thread-local state.

use nix::errno::Errno;
use thiserror::Error;

/// Classified OS failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    #[error("resource busy or locked")]
    ResourceBusy,

    #[error("no such file or process")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("name too long")]
    NameTooLong,

    #[error("already exists")]
    AlreadyExists,

    #[error("operation would block")]
    WouldBlock,

    #[error("bad file descriptor")]
    BadDescriptor,

    #[error("not a terminal")]
    NotATerminal,

    #[error("result out of range")]
    RangeError,

    #[error("os error {0}: {desc}", desc = describe_raw(.0))]
    Other(i32),
}

fn describe_raw(code: &i32) -> &'static str {
    Errno::from_raw(*code).desc()
}

pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Map a raw `errno` value to its [`ErrorKind`].
///
/// Total: codes outside the curated set become [`ErrorKind::Other`].
pub fn classify(raw: i32) -> ErrorKind {
    match raw {
        libc::EBUSY => ErrorKind::ResourceBusy,
        libc::ENOENT | libc::ESRCH => ErrorKind::NotFound,
        libc::EACCES | libc::EPERM => ErrorKind::PermissionDenied,
        libc::EINVAL => ErrorKind::InvalidArgument,
        libc::ENAMETOOLONG => ErrorKind::NameTooLong,
        libc::EEXIST => ErrorKind::AlreadyExists,
        libc::EAGAIN => ErrorKind::WouldBlock,
        code if code == libc::EWOULDBLOCK => ErrorKind::WouldBlock,
        libc::EBADF => ErrorKind::BadDescriptor,
        libc::ENOTTY => ErrorKind::NotATerminal,
        libc::ERANGE => ErrorKind::RangeError,
        other => ErrorKind::Other(other),
    }
}

impl ErrorKind {
    /// The `errno` value this kind stands for.
    ///
    /// Kinds that several codes collapse into report the canonical one.
    pub fn raw_code(&self) -> i32 {
        match self {
            ErrorKind::ResourceBusy => libc::EBUSY,
            ErrorKind::NotFound => libc::ENOENT,
            ErrorKind::PermissionDenied => libc::EACCES,
            ErrorKind::InvalidArgument => libc::EINVAL,
            ErrorKind::NameTooLong => libc::ENAMETOOLONG,
            ErrorKind::AlreadyExists => libc::EEXIST,
            ErrorKind::WouldBlock => libc::EAGAIN,
            ErrorKind::BadDescriptor => libc::EBADF,
            ErrorKind::NotATerminal => libc::ENOTTY,
            ErrorKind::RangeError => libc::ERANGE,
            ErrorKind::Other(code) => *code,
        }
    }

    /// OS description (`strerror`) of the underlying code.
    pub fn describe(&self) -> &'static str {
        Errno::from_raw(self.raw_code()).desc()
    }
}

impl From<Errno> for ErrorKind {
    fn from(errno: Errno) -> Self {
        classify(errno as i32)
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => classify(code),
            None => match err.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
                std::io::ErrorKind::WouldBlock => ErrorKind::WouldBlock,
                _ => ErrorKind::InvalidArgument,
            },
        }
    }
}
