//! Soft-shutdown signal latch.
//!
//! `INT`, `TERM` and `QUIT` all mean graceful shutdown; the latch records
//! the most recent one plus a delivery count so the supervisor can forward
//! the signal to its children and escalate on a repeat. `HUP` is reserved
//! for future reload and left at its default disposition.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

static PENDING: AtomicI32 = AtomicI32::new(0);
static DELIVERIES: AtomicU32 = AtomicU32::new(0);

extern "C" fn on_signal(signum: i32) {
    PENDING.store(signum, Ordering::SeqCst);
    DELIVERIES.fetch_add(1, Ordering::SeqCst);
}

/// Route the shutdown signals to the latch.
///
/// Installed without `SA_RESTART`: blocking accepts and reads return
/// `EINTR` so worker loops observe the latch between requests.
pub fn install() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGQUIT] {
        unsafe {
            sigaction(signal, &action)?;
        }
    }
    Ok(())
}

/// The most recent soft signal, if one was delivered.
pub fn pending() -> Option<Signal> {
    match PENDING.load(Ordering::SeqCst) {
        0 => None,
        signum => Signal::try_from(signum).ok(),
    }
}

/// Total soft-signal deliveries since install (or [`reset`]).
pub fn deliveries() -> u32 {
    DELIVERIES.load(Ordering::SeqCst)
}

/// Clear the latch. Called by freshly forked children before serving.
pub fn reset() {
    PENDING.store(0, Ordering::SeqCst);
    DELIVERIES.store(0, Ordering::SeqCst);
}
