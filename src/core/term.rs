//! Terminal mode controller
//!
//! Moves a terminal descriptor between canonical and raw mode. Entering raw
//! mode hands back a [`TerminalState`] snapshot of everything it changed;
//! replaying that snapshot with [`restore`] puts the terminal back exactly.
//!
//! # States
//!
//! ```text
//! Canonical ──enter_raw──▶ Raw
//!     ▲                     │
//!     └──────restore────────┘
//! ```
//!
//! Prefer [`RawMode`], which restores on drop, over pairing the calls by hand.

use std::io::IsTerminal;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use bitflags::bitflags;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::termios::{
    self, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices,
    Termios,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, Result};

mod ioctl {
    nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, libc::winsize);
}

bitflags! {
    /// Parts of a terminal's configuration, used to report differences
    /// between two snapshots.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AttrGroups: u8 {
        const INPUT         = 0b0000_0001;
        const OUTPUT        = 0b0000_0010;
        const CONTROL       = 0b0000_0100;
        const LOCAL         = 0b0000_1000;
        const CONTROL_CHARS = 0b0001_0000;
        const STATUS_FLAGS  = 0b0010_0000;

        const LINE_DISCIPLINE = Self::INPUT.bits()
            | Self::OUTPUT.bits()
            | Self::CONTROL.bits()
            | Self::LOCAL.bits()
            | Self::CONTROL_CHARS.bits();
    }
}

/// Raw mode tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawOptions {
    /// Also set `O_NONBLOCK` on the descriptor.
    pub nonblocking: bool,
}

impl Default for RawOptions {
    fn default() -> Self {
        Self { nonblocking: true }
    }
}

/// Line discipline settings plus file status flags of one descriptor.
#[derive(Clone, Debug)]
pub struct TerminalState {
    fd: RawFd,
    termios: Termios,
    status_flags: OFlag,
}

impl TerminalState {
    /// Snapshot the current configuration of `fd`.
    pub fn capture<Fd: AsFd>(fd: Fd) -> Result<Self> {
        let fd = fd.as_fd();
        let bits = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?;
        let termios = termios::tcgetattr(fd)?;

        Ok(Self {
            fd: fd.as_raw_fd(),
            termios,
            status_flags: OFlag::from_bits_retain(bits),
        })
    }

    /// Descriptor this snapshot was taken from.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn termios(&self) -> &Termios {
        &self.termios
    }

    pub fn status_flags(&self) -> OFlag {
        self.status_flags
    }

    /// Which groups differ between `self` and `other`.
    pub fn diff(&self, other: &TerminalState) -> AttrGroups {
        let (a, b) = (&self.termios, &other.termios);
        let mut groups = AttrGroups::empty();

        groups.set(AttrGroups::INPUT, a.input_flags != b.input_flags);
        groups.set(AttrGroups::OUTPUT, a.output_flags != b.output_flags);
        groups.set(AttrGroups::CONTROL, a.control_flags != b.control_flags);
        groups.set(AttrGroups::LOCAL, a.local_flags != b.local_flags);
        groups.set(AttrGroups::CONTROL_CHARS, a.control_chars != b.control_chars);
        groups.set(AttrGroups::STATUS_FLAGS, self.status_flags != other.status_flags);
        groups
    }

    /// True when input is delivered byte by byte, unechoed and unprocessed.
    pub fn is_raw(&self) -> bool {
        let t = &self.termios;
        !t.local_flags
            .intersects(LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::IEXTEN | LocalFlags::ISIG)
            && !t.input_flags.intersects(
                InputFlags::BRKINT
                    | InputFlags::ICRNL
                    | InputFlags::INPCK
                    | InputFlags::ISTRIP
                    | InputFlags::IXON,
            )
            && t.control_chars[SpecialCharacterIndices::VMIN as usize] == 1
            && t.control_chars[SpecialCharacterIndices::VTIME as usize] == 0
    }
}

/// Raw variant of `base`: no input processing, no echo, no signal keys,
/// 8-bit characters, reads return once a single byte is available.
fn make_raw(base: &Termios) -> Termios {
    let mut raw = base.clone();

    raw.input_flags.remove(
        InputFlags::BRKINT | InputFlags::ICRNL | InputFlags::INPCK | InputFlags::ISTRIP | InputFlags::IXON,
    );
    raw.output_flags.insert(OutputFlags::ONLCR);
    raw.control_flags.remove(ControlFlags::CSIZE);
    raw.control_flags.insert(ControlFlags::CS8);
    raw.local_flags
        .remove(LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::IEXTEN | LocalFlags::ISIG);
    raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
    raw
}

/// Put `fd` into raw mode with default options.
///
/// Returns the configuration that was in place before, for [`restore`].
pub fn enter_raw<Fd: AsFd>(fd: Fd) -> Result<TerminalState> {
    enter_raw_with(fd, RawOptions::default())
}

/// Put `fd` into raw mode.
///
/// The line discipline is changed with a single `tcsetattr(TCSADRAIN)`.
/// When `O_NONBLOCK` cannot be set afterwards the attribute change is
/// undone before the error is returned, so failure always leaves the
/// terminal as it was.
pub fn enter_raw_with<Fd: AsFd>(fd: Fd, options: RawOptions) -> Result<TerminalState> {
    let fd = fd.as_fd();
    let saved = TerminalState::capture(fd)?;
    let raw = make_raw(&saved.termios);

    termios::tcsetattr(fd, SetArg::TCSADRAIN, &raw)?;

    if options.nonblocking {
        let flags = saved.status_flags | OFlag::O_NONBLOCK;
        if let Err(e) = fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags)) {
            warn!("fd {}: setting O_NONBLOCK failed ({}), rolling back", saved.fd, e);
            if let Err(rollback) = termios::tcsetattr(fd, SetArg::TCSADRAIN, &saved.termios) {
                warn!("fd {}: rollback failed: {}", saved.fd, rollback);
            }
            return Err(e.into());
        }
    }

    info!("fd {}: entered raw mode", saved.fd);
    Ok(saved)
}

/// Reapply a snapshot taken by [`enter_raw`] or [`TerminalState::capture`].
///
/// Writes nothing if the terminal already matches, so repeated calls are
/// harmless. The snapshot must come from the same descriptor number.
pub fn restore<Fd: AsFd>(fd: Fd, state: &TerminalState) -> Result<()> {
    let fd = fd.as_fd();
    if fd.as_raw_fd() != state.fd {
        warn!(
            "refusing to restore state of fd {} onto fd {}",
            state.fd,
            fd.as_raw_fd()
        );
        return Err(ErrorKind::InvalidArgument);
    }

    let current = TerminalState::capture(fd)?;
    let changed = state.diff(&current);
    if changed.is_empty() {
        debug!("fd {}: already in saved mode", state.fd);
        return Ok(());
    }

    let line_discipline = changed & AttrGroups::LINE_DISCIPLINE;
    if !line_discipline.is_empty() {
        termios::tcsetattr(fd, SetArg::TCSADRAIN, &state.termios)?;
    }
    if changed.contains(AttrGroups::STATUS_FLAGS) {
        if let Err(e) = fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(state.status_flags)) {
            warn!(
                "fd {}: restoring status flags failed ({}), only {:?} restored",
                state.fd, e, line_discipline
            );
            return Err(e.into());
        }
    }

    info!("fd {}: restored ({:?})", state.fd, changed);
    Ok(())
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

/// Current size of the terminal behind `fd`.
pub fn window_size<Fd: AsFd>(fd: Fd) -> Result<WindowSize> {
    let raw = fd.as_fd().as_raw_fd();
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCGWINSZ writes exactly one winsize into the pointer.
    unsafe { ioctl::tiocgwinsz(raw, &mut ws) }?;

    Ok(WindowSize {
        rows: ws.ws_row,
        cols: ws.ws_col,
    })
}

/// Size of the terminal on standard input.
pub fn stdin_window_size() -> Result<WindowSize> {
    window_size(std::io::stdin())
}

pub fn is_terminal<Fd: AsFd>(fd: Fd) -> bool {
    fd.as_fd().is_terminal()
}

/// Raw mode for as long as this value lives.
pub struct RawMode<'fd> {
    fd: BorrowedFd<'fd>,
    saved: TerminalState,
    active: bool,
}

impl<'fd> RawMode<'fd> {
    pub fn enter(fd: BorrowedFd<'fd>) -> Result<Self> {
        Self::enter_with(fd, RawOptions::default())
    }

    pub fn enter_with(fd: BorrowedFd<'fd>, options: RawOptions) -> Result<Self> {
        let saved = enter_raw_with(fd, options)?;
        Ok(Self {
            fd,
            saved,
            active: true,
        })
    }

    /// Configuration that will be put back.
    pub fn saved(&self) -> &TerminalState {
        &self.saved
    }

    /// Restore now and report failure, instead of logging it on drop.
    pub fn restore(mut self) -> Result<()> {
        restore(self.fd, &self.saved)?;
        self.active = false;
        Ok(())
    }
}

impl Drop for RawMode<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(e) = restore(self.fd, &self.saved) {
            warn!("fd {}: failed to restore terminal: {}", self.saved.fd, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::pty::{openpty, OpenptyResult, Winsize};

    fn pty(rows: u16, cols: u16) -> OpenptyResult {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        openpty(Some(&winsize), None).unwrap()
    }

    #[test]
    fn test_enter_raw_applies_raw_settings() {
        let pty = pty(24, 80);
        let before = TerminalState::capture(&pty.slave).unwrap();
        assert!(!before.is_raw());

        let saved = enter_raw(&pty.slave).unwrap();
        let now = TerminalState::capture(&pty.slave).unwrap();

        assert!(now.is_raw());
        assert!(now.termios().output_flags.contains(OutputFlags::ONLCR));
        assert!(now.termios().control_flags.contains(ControlFlags::CS8));
        assert!(now.status_flags().contains(OFlag::O_NONBLOCK));
        assert!(saved.diff(&before).is_empty());

        restore(&pty.slave, &saved).unwrap();
    }

    #[test]
    fn test_round_trip_restores_exact_state() {
        let pty = pty(24, 80);
        let before = TerminalState::capture(&pty.slave).unwrap();

        let saved = enter_raw(&pty.slave).unwrap();
        assert!(!saved.diff(&TerminalState::capture(&pty.slave).unwrap()).is_empty());

        restore(&pty.slave, &saved).unwrap();
        let after = TerminalState::capture(&pty.slave).unwrap();
        assert_eq!(before.diff(&after), AttrGroups::empty());
    }

    #[test]
    fn test_restore_twice_is_noop() {
        let pty = pty(24, 80);
        let saved = enter_raw(&pty.slave).unwrap();

        restore(&pty.slave, &saved).unwrap();
        let first = TerminalState::capture(&pty.slave).unwrap();
        restore(&pty.slave, &saved).unwrap();
        let second = TerminalState::capture(&pty.slave).unwrap();

        assert!(first.diff(&second).is_empty());
    }

    #[test]
    fn test_restore_after_intervening_change() {
        let pty = pty(24, 80);
        let before = TerminalState::capture(&pty.slave).unwrap();
        let saved = enter_raw(&pty.slave).unwrap();

        let mut changed = TerminalState::capture(&pty.slave).unwrap().termios().clone();
        changed.local_flags.insert(LocalFlags::ECHO);
        changed.control_chars[SpecialCharacterIndices::VMIN as usize] = 4;
        termios::tcsetattr(&pty.slave, SetArg::TCSANOW, &changed).unwrap();
        fcntl(pty.slave.as_raw_fd(), FcntlArg::F_SETFL(before.status_flags())).unwrap();

        restore(&pty.slave, &saved).unwrap();
        let after = TerminalState::capture(&pty.slave).unwrap();
        assert_eq!(before.diff(&after), AttrGroups::empty());
    }

    #[test]
    fn test_restore_without_entering_raw() {
        let pty = pty(24, 80);
        let state = TerminalState::capture(&pty.slave).unwrap();
        restore(&pty.slave, &state).unwrap();
    }

    #[test]
    fn test_restore_rejects_other_descriptor() {
        let a = pty(24, 80);
        let b = pty(24, 80);
        let saved = enter_raw(&a.slave).unwrap();

        assert_eq!(restore(&b.slave, &saved), Err(ErrorKind::InvalidArgument));
        restore(&a.slave, &saved).unwrap();
    }

    #[test]
    fn test_blocking_option_leaves_status_flags() {
        let pty = pty(24, 80);
        let saved = enter_raw_with(&pty.slave, RawOptions { nonblocking: false }).unwrap();
        let now = TerminalState::capture(&pty.slave).unwrap();

        assert!(now.is_raw());
        assert!(!saved.diff(&now).contains(AttrGroups::STATUS_FLAGS));
        restore(&pty.slave, &saved).unwrap();
    }

    #[test]
    fn test_guard_restores_on_drop() {
        let pty = pty(24, 80);
        let before = TerminalState::capture(&pty.slave).unwrap();
        {
            let guard = RawMode::enter(pty.slave.as_fd()).unwrap();
            assert!(guard.saved().diff(&before).is_empty());
            assert!(TerminalState::capture(&pty.slave).unwrap().is_raw());
        }
        let after = TerminalState::capture(&pty.slave).unwrap();
        assert!(before.diff(&after).is_empty());
    }

    #[test]
    fn test_guard_explicit_restore() {
        let pty = pty(24, 80);
        let guard = RawMode::enter(pty.slave.as_fd()).unwrap();
        guard.restore().unwrap();
        assert!(!TerminalState::capture(&pty.slave).unwrap().is_raw());
    }

    #[test]
    fn test_enter_raw_on_regular_file_fails_cleanly() {
        let file = tempfile::tempfile().unwrap();
        let flags_before = fcntl(file.as_raw_fd(), FcntlArg::F_GETFL).unwrap();

        assert_eq!(enter_raw(&file).unwrap_err(), ErrorKind::NotATerminal);
        assert_eq!(fcntl(file.as_raw_fd(), FcntlArg::F_GETFL).unwrap(), flags_before);
    }

    #[test]
    fn test_window_size_of_pty() {
        let pty = pty(40, 132);
        let size = window_size(&pty.slave).unwrap();
        assert_eq!(size, WindowSize { rows: 40, cols: 132 });
    }

    #[test]
    fn test_window_size_of_regular_file() {
        let file = tempfile::tempfile().unwrap();
        assert_eq!(window_size(&file), Err(ErrorKind::NotATerminal));
        assert!(!is_terminal(&file));
    }

    #[test]
    fn test_diff_reports_groups() {
        let pty = pty(24, 80);
        let before = TerminalState::capture(&pty.slave).unwrap();
        let mut raw = before.clone();
        raw.termios = make_raw(&before.termios);

        let changed = before.diff(&raw);
        assert!(changed.contains(AttrGroups::LOCAL));
        assert!(changed.contains(AttrGroups::INPUT));
        assert!(!changed.contains(AttrGroups::STATUS_FLAGS));
    }
}
