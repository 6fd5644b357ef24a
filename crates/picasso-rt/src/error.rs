//! Error taxonomy: programmer and resource-exhaustion errors are fatal
//! (log + abort with a backtrace); recoverable I/O errors are carried
//! in the task's `IoRecord`; the narrow set of listener/arena-setup
//! failures a caller can act on are `Result`s built from this enum.

use std::fmt;

/// Errors a caller can recover from: listener setup and the handful of
/// syscall-wrapper paths exposed before any task is scheduled. Everything
/// else in the runtime either can't fail (arena growth aborts internally)
/// or surfaces through a task's `IoRecord`.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to bind listener on {addr}: {source}")]
    ListenFailed { addr: String, #[source] source: std::io::Error },

    #[error("invalid listen option: {0}")]
    InvalidListenOption(String),

    #[error("failed to create epoll/kqueue poller: {0}")]
    PollerInit(std::io::Error),

    #[error("failed to initialize disk I/O ring: {0}")]
    RingInit(std::io::Error),

    #[error("syscall {name} failed: {source}")]
    Syscall { name: &'static str, #[source] source: std::io::Error },
}

/// Programmer/resource-exhaustion fatal path: logs `msg` plus a
/// backtrace to stderr and terminates the process. There is no
/// recovery; callers never see a `Result` for this class of error.
pub fn runtime_error(msg: impl fmt::Display) -> ! {
    let bt = backtrace::Backtrace::new();
    log::error!("picasso-rt: fatal: {msg}\n{bt:?}");
    std::process::exit(1);
}

/// Same as [`runtime_error`] but for faults observed from a signal
/// handler, where taking the `log` machinery's locks is unsafe. Writes
/// directly to stderr with only async-signal-safe operations.
pub fn runtime_error_from_signal(msg: &str) -> ! {
    use std::io::Write;
    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "picasso-rt: fatal (signal): {msg}");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_failed_display() {
        let err = RuntimeError::ListenFailed {
            addr: "127.0.0.1:8000".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("127.0.0.1:8000"));
    }
}
