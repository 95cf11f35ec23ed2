//! Signal handling (SPEC_FULL.md §4.H "Scheduling"/"Reaping"). The `SIGCHLD`
//! handler only ever touches a lock-free atomic flag; actual reaping happens
//! from the main loop via `try_wait`, never inside the handler.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, SigHandler, Signal};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_: i32) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_sigchld(_: i32) {
    CHILD_EXITED.store(true, Ordering::SeqCst);
}

/// Installs handlers for the signals this server cares about: graceful
/// shutdown on INT/QUIT/TERM, a cheap flag on CHLD, SIGPIPE ignored so a
/// write to a closed client socket surfaces as `EPIPE` instead of killing
/// the process, SIGHUP a no-op (no config reload support).
pub fn install() -> nix::Result<()> {
    unsafe {
        let shutdown_handler = SigHandler::Handler(on_shutdown_signal);
        signal::sigaction(Signal::SIGINT, &signal::SigAction::new(
            shutdown_handler,
            signal::SaFlags::empty(),
            signal::SigSet::empty(),
        ))?;
        signal::sigaction(Signal::SIGQUIT, &signal::SigAction::new(
            shutdown_handler,
            signal::SaFlags::empty(),
            signal::SigSet::empty(),
        ))?;
        signal::sigaction(Signal::SIGTERM, &signal::SigAction::new(
            shutdown_handler,
            signal::SaFlags::empty(),
            signal::SigSet::empty(),
        ))?;
        signal::sigaction(Signal::SIGCHLD, &signal::SigAction::new(
            SigHandler::Handler(on_sigchld),
            signal::SaFlags::SA_RESTART,
            signal::SigSet::empty(),
        ))?;
        signal::sigaction(Signal::SIGPIPE, &signal::SigAction::new(
            SigHandler::SigIgn,
            signal::SaFlags::empty(),
            signal::SigSet::empty(),
        ))?;
        signal::sigaction(Signal::SIGHUP, &signal::SigAction::new(
            SigHandler::SigIgn,
            signal::SaFlags::empty(),
            signal::SigSet::empty(),
        ))?;
    }
    Ok(())
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Consumes the "a child exited" flag set by the `SIGCHLD` handler. The
/// event loop's zombie-purgatory sweep calls this each iteration to decide
/// whether it's worth running `try_wait` over pending PIDs.
pub fn take_child_exited() -> bool {
    CHILD_EXITED.swap(false, Ordering::SeqCst)
}
