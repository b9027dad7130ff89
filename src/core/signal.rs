//! Signal catalog and delivery
//!
//! Dispositions are process-wide kernel state. Nothing here caches them:
//! every call goes to the OS and reflects whatever is installed right now,
//! including changes made by other code in the process.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI32, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::{debug, info};

use crate::core::process::{current_pid, ProcessId};
use crate::error::{ErrorKind, Result};

/// Returned by [`SignalName::number`] for signals the platform lacks.
pub const UNSUPPORTED: i32 = -1;

/// Last signal recorded by [`catch`], 0 when none is pending.
static CAUGHT: AtomicI32 = AtomicI32::new(0);

/// The fixed set of signals this crate knows by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalName {
    Interrupt,
    Terminate,
    Kill,
    Abort,
    FloatingPointException,
    IllegalInstruction,
    SegmentationFault,
    TerminalStop,
}

impl SignalName {
    pub const ALL: [SignalName; 8] = [
        SignalName::Interrupt,
        SignalName::Terminate,
        SignalName::Kill,
        SignalName::Abort,
        SignalName::FloatingPointException,
        SignalName::IllegalInstruction,
        SignalName::SegmentationFault,
        SignalName::TerminalStop,
    ];

    /// Platform signal number, or [`UNSUPPORTED`].
    pub fn number(self) -> i32 {
        match self {
            SignalName::Interrupt => libc::SIGINT,
            SignalName::Terminate => libc::SIGTERM,
            SignalName::Kill => libc::SIGKILL,
            SignalName::Abort => libc::SIGABRT,
            SignalName::FloatingPointException => libc::SIGFPE,
            SignalName::IllegalInstruction => libc::SIGILL,
            SignalName::SegmentationFault => libc::SIGSEGV,
            SignalName::TerminalStop => libc::SIGTSTP,
        }
    }

    pub fn is_supported(self) -> bool {
        self.number() != UNSUPPORTED
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalName::Interrupt => "interrupt",
            SignalName::Terminate => "terminate",
            SignalName::Kill => "kill",
            SignalName::Abort => "abort",
            SignalName::FloatingPointException => "floating-point-exception",
            SignalName::IllegalInstruction => "illegal-instruction",
            SignalName::SegmentationFault => "segmentation-fault",
            SignalName::TerminalStop => "terminal-stop",
        }
    }

    fn conventional(self) -> &'static str {
        match self {
            SignalName::Interrupt => "INT",
            SignalName::Terminate => "TERM",
            SignalName::Kill => "KILL",
            SignalName::Abort => "ABRT",
            SignalName::FloatingPointException => "FPE",
            SignalName::IllegalInstruction => "ILL",
            SignalName::SegmentationFault => "SEGV",
            SignalName::TerminalStop => "TSTP",
        }
    }
}

impl fmt::Display for SignalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalName {
    type Err = ErrorKind;

    /// Accepts `terminal-stop`, `SIGTSTP` and `TSTP` alike, case-insensitive.
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let short = upper.strip_prefix("SIG").unwrap_or(&upper);

        SignalName::ALL
            .into_iter()
            .find(|name| {
                name.as_str().eq_ignore_ascii_case(s.trim()) || name.conventional() == short
            })
            .ok_or(ErrorKind::InvalidArgument)
    }
}

/// Number for `name`; unknown names and signals missing on this platform
/// both give [`UNSUPPORTED`].
pub fn signal_number(name: &str) -> i32 {
    name.parse::<SignalName>()
        .map(SignalName::number)
        .unwrap_or(UNSUPPORTED)
}

/// Deliver signal number `signal` to `pid`.
///
/// Any number is passed through to the kernel, which rejects invalid ones
/// with [`ErrorKind::InvalidArgument`]. Signal 0 delivers nothing and only
/// checks that `pid` exists and may be signalled.
pub fn send(pid: ProcessId, signal: i32) -> Result<()> {
    debug!("sending signal {} to {}", signal, pid);
    // SAFETY: kill takes plain integers and has no memory effects here.
    let ret = unsafe { libc::kill(pid.as_raw(), signal) };
    Errno::result(ret)?;
    Ok(())
}

/// Whether `pid` names a live process, including ones we may not signal.
pub fn is_alive(pid: ProcessId) -> bool {
    match send(pid, 0) {
        Ok(()) => true,
        Err(ErrorKind::PermissionDenied) => true,
        Err(_) => false,
    }
}

/// Built-in signal dispositions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    /// What the disposition call returns on failure. Never installable.
    Error,
}

impl Disposition {
    /// The raw handler value (`SIG_DFL`, `SIG_IGN`, `SIG_ERR`).
    pub fn token(self) -> libc::sighandler_t {
        match self {
            Disposition::Default => libc::SIG_DFL,
            Disposition::Ignore => libc::SIG_IGN,
            Disposition::Error => libc::SIG_ERR,
        }
    }

    pub fn from_token(token: libc::sighandler_t) -> Option<Self> {
        [Disposition::Default, Disposition::Ignore, Disposition::Error]
            .into_iter()
            .find(|d| d.token() == token)
    }
}

/// Install `disposition` for `name` and return the one it replaced.
///
/// `Ok(None)` means a custom handler had been installed. Kill and stop
/// signals cannot be changed and fail with [`ErrorKind::InvalidArgument`],
/// as does installing [`Disposition::Error`].
pub fn set_disposition(name: SignalName, disposition: Disposition) -> Result<Option<Disposition>> {
    let sig = Signal::try_from(name.number())?;
    let handler = match disposition {
        Disposition::Default => SigHandler::SigDfl,
        Disposition::Ignore => SigHandler::SigIgn,
        Disposition::Error => return Err(ErrorKind::InvalidArgument),
    };

    // SAFETY: only SIG_DFL and SIG_IGN are installed; no handler code runs.
    let previous = unsafe { signal::signal(sig, handler) }?;

    info!("{}: disposition set to {:?}", name, disposition);
    Ok(match previous {
        SigHandler::SigDfl => Some(Disposition::Default),
        SigHandler::SigIgn => Some(Disposition::Ignore),
        _ => None,
    })
}

extern "C" fn note_signal(number: libc::c_int) {
    CAUGHT.store(number, Ordering::SeqCst);
}

/// Record deliveries of `number` instead of acting on them.
///
/// The handler only notes the signal; poll for it with [`take_caught`].
/// Blocking calls are interrupted rather than restarted.
pub fn catch(number: i32) -> Result<()> {
    let sig = Signal::try_from(number)?;
    let action = SigAction::new(
        SigHandler::Handler(note_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );

    // SAFETY: the handler performs a single atomic store.
    unsafe { signal::sigaction(sig, &action) }?;
    debug!("catching {}", sig);
    Ok(())
}

/// The signal recorded since the last call, if any.
pub fn take_caught() -> Option<i32> {
    match CAUGHT.swap(0, Ordering::SeqCst) {
        0 => None,
        number => Some(number),
    }
}

/// Reinstall the default action for `number` and deliver it to this
/// process.
///
/// For terminating signals this does not return. For stop signals it
/// returns once the process is continued.
pub fn reraise(number: i32) -> Result<()> {
    let sig = Signal::try_from(number)?;
    // SAFETY: SIG_DFL runs no code in this process.
    unsafe { signal::signal(sig, SigHandler::SigDfl) }?;
    info!("re-raising {}", sig);
    send(current_pid(), number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;

    #[test]
    fn test_catalog_numbers() {
        assert_eq!(SignalName::Interrupt.number(), libc::SIGINT);
        assert_eq!(SignalName::Terminate.number(), libc::SIGTERM);
        assert_eq!(SignalName::Kill.number(), libc::SIGKILL);
        assert_eq!(SignalName::SegmentationFault.number(), libc::SIGSEGV);
        assert!(SignalName::TerminalStop.number() > 0);
        assert!(SignalName::ALL.iter().all(|s| s.is_supported()));
    }

    #[test]
    fn test_signal_number_by_name() {
        assert_eq!(signal_number("terminal-stop"), libc::SIGTSTP);
        assert_eq!(signal_number("SIGTERM"), libc::SIGTERM);
        assert_eq!(signal_number("int"), libc::SIGINT);
        assert_eq!(signal_number("Floating-Point-Exception"), libc::SIGFPE);
        assert_eq!(signal_number("no-such-signal"), UNSUPPORTED);
    }

    #[test]
    fn test_names_round_trip_through_display() {
        for name in SignalName::ALL {
            assert_eq!(name.to_string().parse::<SignalName>(), Ok(name));
        }
    }

    #[test]
    fn test_probe_self() {
        send(current_pid(), 0).unwrap();
        assert!(is_alive(current_pid()));
    }

    #[test]
    fn test_send_invalid_number() {
        assert_eq!(send(current_pid(), UNSUPPORTED), Err(ErrorKind::InvalidArgument));
        assert_eq!(send(current_pid(), 4096), Err(ErrorKind::InvalidArgument));
    }

    #[test]
    fn test_send_terminate_to_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = ProcessId::from(child.id());

        send(pid, SignalName::Terminate.number()).unwrap();
        let status = child.wait().unwrap();

        assert_eq!(status.signal(), Some(libc::SIGTERM));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_send_number_outside_catalog() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = ProcessId::from(child.id());

        send(pid, libc::SIGRTMIN()).unwrap();
        let status = child.wait().unwrap();

        assert_eq!(status.signal(), Some(libc::SIGRTMIN()));
    }

    #[test]
    fn test_send_to_missing_process() {
        // Above any configurable pid_max
        let pid = ProcessId::from_raw(i32::MAX);

        assert_eq!(send(pid, SignalName::Terminate.number()), Err(ErrorKind::NotFound));
        assert!(!is_alive(pid));
    }

    #[test]
    fn test_catch_records_delivery() {
        catch(libc::SIGUSR2).unwrap();
        send(current_pid(), libc::SIGUSR2).unwrap();

        let mut caught = None;
        for _ in 0..100 {
            caught = take_caught();
            if caught.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(caught, Some(libc::SIGUSR2));
        assert_eq!(take_caught(), None);

        unsafe { signal::signal(Signal::SIGUSR2, SigHandler::SigDfl) }.unwrap();
    }

    #[test]
    fn test_catch_rejects_invalid_number() {
        assert_eq!(catch(UNSUPPORTED), Err(ErrorKind::InvalidArgument));
        assert_eq!(reraise(UNSUPPORTED), Err(ErrorKind::InvalidArgument));
    }

    #[test]
    fn test_disposition_tokens() {
        assert_eq!(Disposition::Default.token(), libc::SIG_DFL);
        assert_eq!(Disposition::Ignore.token(), libc::SIG_IGN);
        assert_eq!(Disposition::Error.token(), libc::SIG_ERR);
        assert_eq!(Disposition::from_token(libc::SIG_IGN), Some(Disposition::Ignore));
    }

    #[test]
    fn test_set_disposition_reports_previous() {
        let first = set_disposition(SignalName::TerminalStop, Disposition::Ignore).unwrap();
        let second = set_disposition(SignalName::TerminalStop, Disposition::Default).unwrap();

        assert_eq!(second, Some(Disposition::Ignore));

        // A caught signal has a custom handler, not a built-in disposition
        catch(libc::SIGTSTP).unwrap();
        assert_eq!(
            set_disposition(SignalName::TerminalStop, Disposition::Default).unwrap(),
            None
        );

        if let Some(previous) = first {
            set_disposition(SignalName::TerminalStop, previous).unwrap();
        }
    }

    #[test]
    fn test_uninstallable_dispositions() {
        assert_eq!(
            set_disposition(SignalName::Kill, Disposition::Ignore),
            Err(ErrorKind::InvalidArgument)
        );
        assert_eq!(
            set_disposition(SignalName::Interrupt, Disposition::Error),
            Err(ErrorKind::InvalidArgument)
        );
    }
}
