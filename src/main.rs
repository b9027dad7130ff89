//! ttyctl - inspect and drive terminal, lock and signal state
//!
//! A thin command-line front end over the `ttyctl` library, used for
//! manual checks and as the subprocess in the cross-process tests.
//!
//! # Quick Start
//!
//! ```text
//! ttyctl info                 # pid, parent, window size, host details
//! ttyctl lock ~/.x.lock       # single-instance check
//! ttyctl raw                  # raw mode key echo, `q` to quit
//! ttyctl session              # raw mode under the instance lock
//! ttyctl send 1234 terminate  # deliver a signal
//! ```

use std::env;
use std::io::{self, BufRead, Write};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ttyctl::config::Config;
use ttyctl::core::lock::{self, SingleInstance};
use ttyctl::core::process::{self, ProcessId};
use ttyctl::core::signal::{self, SignalName};
use ttyctl::core::term::{self, RawMode};
use ttyctl::host;

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit status when a lock is held by another process
const EXIT_BUSY: i32 = 3;

/// Signals that end or suspend a raw mode loop once the terminal is restored
const LOOP_SIGNALS: [i32; 4] = [libc::SIGTERM, libc::SIGHUP, libc::SIGINT, libc::SIGTSTP];

/// Parsed command line
enum Command {
    Info,
    Lock { path: Option<PathBuf>, hold: bool },
    Owner { path: Option<PathBuf> },
    Raw,
    Session { path: Option<PathBuf> },
    Signals,
    Send { pid: ProcessId, signal: i32 },
    SignalSelf { signal: i32 },
    Exit { code: i32 },
    Random { len: usize },
    Backtrace,
}

fn print_help() {
    eprintln!("ttyctl {} - terminal, lock and signal control", VERSION);
    eprintln!();
    eprintln!("Usage: ttyctl <COMMAND> [ARGS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  info                  Process ids, window size, host details");
    eprintln!("  lock [PATH] [--hold]  Single-instance check on PATH (default: lock_path)");
    eprintln!("                        --hold keeps the lock until stdin closes");
    eprintln!("  owner [PATH]          Show which process holds the lock on PATH");
    eprintln!("  raw                   Raw mode key echo on stdin, q to quit");
    eprintln!("  session [PATH]        Raw mode while holding the lock on PATH");
    eprintln!("  signals               List known signals");
    eprintln!("  send <PID> <SIGNAL>   Send SIGNAL (name or number) to PID");
    eprintln!("  signal-self <SIGNAL>  Send SIGNAL to this process");
    eprintln!("  exit <CODE>           Exit with CODE");
    eprintln!("  random <N>            Print N random bytes as hex");
    eprintln!("  backtrace             Print the current call stack");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Configuration: ~/.ttyctl/config.toml (or $TTYCTL_CONFIG_DIR/config.toml)");
    eprintln!("Log filter override: $TTYCTL_LOG");
}

/// Signal given by catalog name or by number.
fn parse_signal(arg: &str) -> Result<i32, String> {
    if let Ok(n) = arg.parse::<i32>() {
        return Ok(n);
    }
    let name: SignalName = arg
        .parse()
        .map_err(|_| format!("Unknown signal: {}", arg))?;
    if !name.is_supported() {
        return Err(format!("Signal {} is not supported on this platform", name));
    }
    Ok(name.number())
}

fn required<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str, String> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| format!("Missing {} argument", what))
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some(command) = args.get(1) else {
        return Err("Missing command".to_string());
    };

    match command.as_str() {
        "-h" | "--help" | "help" => {
            print_help();
            std::process::exit(0);
        }
        "-v" | "--version" => {
            eprintln!("ttyctl {}", VERSION);
            std::process::exit(0);
        }
        "info" => Ok(Command::Info),
        "lock" => {
            let mut path = None;
            let mut hold = false;
            for arg in &args[2..] {
                match arg.as_str() {
                    "--hold" => hold = true,
                    other if path.is_none() => path = Some(PathBuf::from(other)),
                    other => return Err(format!("Unexpected argument: {}", other)),
                }
            }
            Ok(Command::Lock { path, hold })
        }
        "owner" => Ok(Command::Owner {
            path: args.get(2).map(PathBuf::from),
        }),
        "raw" => Ok(Command::Raw),
        "session" => Ok(Command::Session {
            path: args.get(2).map(PathBuf::from),
        }),
        "signals" => Ok(Command::Signals),
        "send" => {
            let pid = required(args, 2, "pid")?
                .parse::<i32>()
                .map_err(|e| format!("Invalid pid: {}", e))?;
            let signal = parse_signal(required(args, 3, "signal")?)?;
            Ok(Command::Send {
                pid: ProcessId::from_raw(pid),
                signal,
            })
        }
        "signal-self" => Ok(Command::SignalSelf {
            signal: parse_signal(required(args, 2, "signal")?)?,
        }),
        "exit" => {
            let code = required(args, 2, "code")?
                .parse::<i32>()
                .map_err(|e| format!("Invalid exit code: {}", e))?;
            Ok(Command::Exit { code })
        }
        "random" => {
            let len = required(args, 2, "length")?
                .parse::<usize>()
                .map_err(|e| format!("Invalid length: {}", e))?;
            Ok(Command::Random { len })
        }
        "backtrace" => Ok(Command::Backtrace),
        other => Err(format!("Unknown command: {}", other)),
    }
}

/// Log to the configured file. Never to the terminal, which may be in raw
/// mode.
fn init_logging(config: &Config) {
    if let Some(parent) = config.log_file.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env("TTYCTL_LOG")
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(2);
        }
    };

    let config = Config::load();
    init_logging(&config);
    info!("ttyctl {} starting (pid {})", VERSION, process::current_pid());

    match command {
        Command::Info => run_info(),
        Command::Lock { path, hold } => {
            run_lock(&path.unwrap_or_else(|| config.lock_path.clone()), hold)
        }
        Command::Owner { path } => run_owner(&path.unwrap_or_else(|| config.lock_path.clone())),
        Command::Raw => run_raw(&config),
        Command::Session { path } => {
            run_session(&config, &path.unwrap_or_else(|| config.lock_path.clone()))
        }
        Command::Signals => {
            for name in SignalName::ALL {
                println!("{:<26} {}", name.as_str(), name.number());
            }
            Ok(())
        }
        Command::Send { pid, signal } => {
            signal::send(pid, signal).with_context(|| format!("Failed to signal {}", pid))?;
            info!("sent signal {} to {}", signal, pid);
            Ok(())
        }
        Command::SignalSelf { signal } => run_signal_self(signal),
        Command::Exit { code } => process::terminate(code),
        Command::Random { len } => {
            let bytes = host::random_bytes(len).context("Failed to read entropy")?;
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            println!("{}", hex);
            Ok(())
        }
        Command::Backtrace => {
            for frame in host::capture_backtrace(config.backtrace_depth) {
                println!("{}", frame);
            }
            Ok(())
        }
    }
}

fn run_info() -> anyhow::Result<()> {
    let id = process::identity();
    println!("pid:        {}", id.pid);
    println!("parent:     {}", id.parent);

    match term::stdin_window_size() {
        Ok(size) => println!("window:     {}x{}", size.cols, size.rows),
        Err(e) => println!("window:     unavailable ({})", e),
    }

    println!("executable: {}", host::executable_path()?.display());
    println!("cwd:        {}", host::current_working_directory()?.display());
    println!("hostname:   {}", host::hostname()?.to_string_lossy());
    if let Some(home) = host::home_dir() {
        println!("home:       {}", home.display());
    }

    let (secs, micros) = host::now();
    println!("time:       {}.{:06}", secs, micros);
    Ok(())
}

fn run_lock(path: &Path, hold: bool) -> anyhow::Result<()> {
    match SingleInstance::check(path).with_context(|| format!("Failed to lock {}", path.display()))? {
        SingleInstance::Acquired(guard) => {
            println!("locked {}", process::current_pid());
            io::stdout().flush()?;

            if hold {
                // Held until the parent closes our stdin
                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    if line.is_err() {
                        break;
                    }
                }
            }
            drop(guard);
            Ok(())
        }
        SingleInstance::AlreadyRunning { pid } => {
            match pid {
                Some(pid) => println!("busy {}", pid),
                None => println!("busy unknown"),
            }
            io::stdout().flush()?;
            process::terminate(EXIT_BUSY)
        }
    }
}

fn run_owner(path: &Path) -> anyhow::Result<()> {
    // F_GETLK needs no write access
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    match lock::lock_owner(&file)? {
        Some(pid) => println!("locked {}", pid),
        None => println!("unlocked"),
    }
    Ok(())
}

fn run_signal_self(signal: i32) -> anyhow::Result<()> {
    let pid = process::current_pid();
    signal::send(pid, signal).with_context(|| format!("Failed to signal {}", pid))?;

    // Reached only if the signal is ignored, caught or only stops us
    std::thread::sleep(Duration::from_millis(200));
    Err(anyhow!("still running after signal {}", signal))
}

/// How a raw mode loop ended.
enum LoopExit {
    Quit,
    Signal(i32),
}

fn run_raw(config: &Config) -> anyhow::Result<()> {
    match raw_loop(config)? {
        Some(number) => die_by(number),
        None => Ok(()),
    }
}

fn run_session(config: &Config, path: &Path) -> anyhow::Result<()> {
    let guard = match SingleInstance::check(path).with_context(|| format!("Failed to lock {}", path.display()))? {
        SingleInstance::Acquired(guard) => guard,
        SingleInstance::AlreadyRunning { pid } => {
            match pid {
                Some(pid) => println!("busy {}", pid),
                None => println!("busy unknown"),
            }
            io::stdout().flush()?;
            process::terminate(EXIT_BUSY)
        }
    };

    let ended = raw_loop(config);
    drop(guard);
    info!("released {}", path.display());

    match ended? {
        Some(number) => die_by(number),
        None => Ok(()),
    }
}

/// Terminate through the default action of `number`. The terminal must
/// already be restored.
fn die_by(number: i32) -> anyhow::Result<()> {
    signal::reraise(number).with_context(|| format!("Failed to re-raise signal {}", number))?;
    Err(anyhow!("still running after signal {}", number))
}

/// Raw mode key echo on stdin until `q`, or until a terminating signal
/// arrives, which is returned. The terminal is restored on every path out.
fn raw_loop(config: &Config) -> anyhow::Result<Option<i32>> {
    let stdin = io::stdin();
    if !term::is_terminal(&stdin) {
        bail!("stdin is not a terminal");
    }

    for number in LOOP_SIGNALS {
        signal::catch(number).with_context(|| format!("Failed to catch signal {}", number))?;
    }

    loop {
        let raw = RawMode::enter_with(stdin.as_fd(), config.raw_mode).context("Failed to enter raw mode")?;
        let result = echo_keys();
        if let Err(e) = &result {
            error!("raw mode loop failed: {}", e);
        }
        raw.restore().context("Failed to restore terminal")?;

        match result? {
            LoopExit::Quit => return Ok(None),
            LoopExit::Signal(number) if number == libc::SIGTSTP => {
                // Stops here until continued, then back to raw mode
                signal::reraise(number).context("Failed to suspend")?;
                signal::catch(number).context("Failed to catch suspend")?;
                info!("resumed");
            }
            LoopExit::Signal(number) => {
                info!("leaving raw mode on signal {}", number);
                return Ok(Some(number));
            }
        }
    }
}

fn echo_keys() -> anyhow::Result<LoopExit> {
    let mut out = io::stdout();
    let size = term::stdin_window_size()?;
    write!(out, "raw mode, {}x{}, q to quit\r\n", size.cols, size.rows)?;
    out.flush()?;

    loop {
        if let Some(number) = signal::take_caught() {
            return Ok(LoopExit::Signal(number));
        }

        let ready = match event::poll(Duration::from_millis(250)) {
            Ok(ready) => ready,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => false,
            Err(e) => return Err(e.into()),
        };
        if !ready {
            continue;
        }

        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if key.code == KeyCode::Char('q')
                    || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
                {
                    return Ok(LoopExit::Quit);
                }
                write!(out, "{:?} {:?}\r\n", key.code, key.modifiers)?;
            }
            Event::Resize(_, _) => {
                // Re-query rather than trusting the event payload
                let size = term::stdin_window_size()?;
                write!(out, "resized to {}x{}\r\n", size.cols, size.rows)?;
            }
            _ => {}
        }
        out.flush()?;
    }
}
