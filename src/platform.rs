use anyhow::Result;
use crossbeam_channel::Sender;
use std::io::{self, Write};
use std::process;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;
use tracing::warn;

// Cross-platform signal handling
#[cfg(unix)]
use signal_hook::{consts::SIGINT, consts::SIGPIPE, consts::SIGTERM, iterator::Signals};

// Additional signals for stats printing
#[cfg(all(
    unix,
    any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    )
))]
use signal_hook::consts::SIGINFO;

#[cfg(unix)]
use signal_hook::consts::SIGUSR1;

#[cfg(windows)]
use signal_hook::{consts::SIGINT, flag};

/// Standard Unix exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    InvalidUsage = 2,
    SignalInt = 130,  // 128 + SIGINT (2)
    SignalPipe = 141, // 128 + SIGPIPE (13)
    SignalTerm = 143, // 128 + SIGTERM (15)
}

impl ExitCode {
    pub fn exit(self) -> ! {
        process::exit(self as i32)
    }
}

/// First shutdown signal received, 0 while none arrived
static SHUTDOWN_SIGNAL: AtomicI32 = AtomicI32::new(0);

fn record_shutdown_signal(sig: i32) {
    let _ = SHUTDOWN_SIGNAL.compare_exchange(0, sig, Ordering::Relaxed, Ordering::Relaxed);
}

/// Control messages sent by the signal handler to the pipeline driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ctrl {
    Shutdown { immediate: bool },
    PrintStats,
}

/// Turns process signals into [`Ctrl`] messages.
///
/// The first SIGINT or SIGTERM requests a graceful shutdown; a second one
/// exits right away.
pub struct SignalHandler {
    _handle: thread::JoinHandle<()>,
}

impl SignalHandler {
    pub fn new(ctrl_sender: Sender<Ctrl>) -> Result<Self> {
        #[cfg(unix)]
        {
            let mut signals_to_handle = vec![SIGINT, SIGPIPE, SIGTERM, SIGUSR1];

            // CTRL-T on BSD-like systems including macOS
            #[cfg(all(
                unix,
                any(
                    target_os = "macos",
                    target_os = "freebsd",
                    target_os = "openbsd",
                    target_os = "netbsd",
                    target_os = "dragonfly"
                )
            ))]
            signals_to_handle.push(SIGINFO);

            let mut signals = Signals::new(&signals_to_handle)?;

            let handle = thread::Builder::new()
                .name("loadstat-signals".into())
                .spawn(move || {
                    let mut shutdown_count = 0;
                    for sig in signals.forever() {
                        match sig {
                            SIGINT | SIGTERM => {
                                record_shutdown_signal(sig);
                                shutdown_count += 1;
                                let immediate = shutdown_count > 1;
                                if sig == SIGTERM && !immediate {
                                    warn!("Received SIGTERM, shutting down gracefully");
                                }
                                let _ = ctrl_sender.send(Ctrl::Shutdown { immediate });
                                if immediate {
                                    exit_code_for_signal(sig).exit();
                                }
                            }
                            SIGPIPE => {
                                record_shutdown_signal(sig);
                                ExitCode::SignalPipe.exit();
                            }
                            SIGUSR1 => {
                                let _ = ctrl_sender.send(Ctrl::PrintStats);
                            }
                            #[cfg(all(
                                unix,
                                any(
                                    target_os = "macos",
                                    target_os = "freebsd",
                                    target_os = "openbsd",
                                    target_os = "netbsd",
                                    target_os = "dragonfly"
                                )
                            ))]
                            SIGINFO => {
                                let _ = ctrl_sender.send(Ctrl::PrintStats);
                            }
                            _ => warn!(signal = sig, "Received unexpected signal"),
                        }
                    }
                })?;

            Ok(SignalHandler { _handle: handle })
        }

        #[cfg(windows)]
        {
            let term_flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
            flag::register(SIGINT, std::sync::Arc::clone(&term_flag))?;

            let handle = thread::Builder::new()
                .name("loadstat-signals".into())
                .spawn(move || {
                    let mut shutdown_count = 0;
                    loop {
                        thread::sleep(std::time::Duration::from_millis(100));
                        if term_flag.swap(false, Ordering::Relaxed) {
                            record_shutdown_signal(SIGINT);
                            shutdown_count += 1;
                            let immediate = shutdown_count > 1;
                            let _ = ctrl_sender.send(Ctrl::Shutdown { immediate });
                            if immediate {
                                ExitCode::SignalInt.exit();
                            }
                        }
                    }
                })?;

            Ok(SignalHandler { _handle: handle })
        }
    }

    pub fn terminated_by_signal() -> bool {
        SHUTDOWN_SIGNAL.load(Ordering::Relaxed) != 0
    }

    /// Exit code matching the first shutdown signal, if one arrived.
    pub fn shutdown_exit_code() -> Option<ExitCode> {
        match SHUTDOWN_SIGNAL.load(Ordering::Relaxed) {
            0 => None,
            sig => Some(exit_code_for_signal(sig)),
        }
    }
}

#[cfg(unix)]
fn exit_code_for_signal(sig: i32) -> ExitCode {
    match sig {
        SIGTERM => ExitCode::SignalTerm,
        SIGPIPE => ExitCode::SignalPipe,
        _ => ExitCode::SignalInt,
    }
}

#[cfg(not(unix))]
fn exit_code_for_signal(_sig: i32) -> ExitCode {
    ExitCode::SignalInt
}

/// Write the report to stdout; a closed pipe ends the process quietly.
pub fn write_stdout(data: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match writeln!(stdout, "{}", data).and_then(|()| stdout.flush()) {
        Ok(()) => Ok(()),
        Err(e) if is_broken_pipe(&e) => ExitCode::SignalPipe.exit(),
        Err(e) => Err(anyhow::anyhow!("Failed to write to stdout: {}", e)),
    }
}

fn is_broken_pipe(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.kind() == io::ErrorKind::BrokenPipe
    }
    #[cfg(windows)]
    {
        e.kind() == io::ErrorKind::BrokenPipe
            || e.raw_os_error() == Some(232) // ERROR_NO_DATA "The pipe is being closed"
            || e.raw_os_error() == Some(109) // ERROR_BROKEN_PIPE "The pipe has been ended"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::InvalidUsage as i32, 2);
        assert_eq!(ExitCode::SignalInt as i32, 130);
        assert_eq!(ExitCode::SignalPipe as i32, 141);
        assert_eq!(ExitCode::SignalTerm as i32, 143);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_for_signal() {
        assert_eq!(exit_code_for_signal(SIGINT), ExitCode::SignalInt);
        assert_eq!(exit_code_for_signal(SIGTERM), ExitCode::SignalTerm);
        assert_eq!(exit_code_for_signal(SIGPIPE), ExitCode::SignalPipe);
    }

    #[cfg(unix)]
    #[test]
    fn test_first_shutdown_signal_decides_exit_code() {
        record_shutdown_signal(SIGTERM);
        record_shutdown_signal(SIGINT);
        assert!(SignalHandler::terminated_by_signal());
        assert_eq!(SignalHandler::shutdown_exit_code(), Some(ExitCode::SignalTerm));
    }

    #[test]
    fn test_broken_pipe_detection() {
        assert!(is_broken_pipe(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_broken_pipe(&io::Error::from(io::ErrorKind::NotFound)));
    }

    #[cfg(unix)]
    #[test]
    fn test_usr1_requests_stats() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let _handler = SignalHandler::new(tx).unwrap();
        signal_hook::low_level::raise(SIGUSR1).unwrap();
        let msg = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();
        assert_eq!(msg, Ctrl::PrintStats);
    }
}
