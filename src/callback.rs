//! Guards around caller-supplied progress/info callbacks (§7: "Callback
//! errors"). A panic inside one of these observational hooks is caught and
//! logged, never allowed to unwind into the protocol state machine.

use std::panic::{catch_unwind, AssertUnwindSafe};

/// Invokes `f(a, b)`, catching any panic and logging it instead of letting
/// it propagate. Used for progress callbacks (`(current, total)`).
pub(crate) fn guarded_progress<F: FnMut(u64, u64)>(f: &mut F, current: u64, total: u64) {
    if catch_unwind(AssertUnwindSafe(|| f(current, total))).is_err() {
        log::warn!("progress callback panicked; ignoring");
    }
}

/// Invokes `f(data)`, catching any panic and logging it instead of letting
/// it propagate. Used for data/info sink callbacks.
pub(crate) fn guarded_sink<F: FnMut(&[u8])>(f: &mut F, data: &[u8]) {
    if catch_unwind(AssertUnwindSafe(|| f(data))).is_err() {
        log::warn!("data callback panicked; ignoring");
    }
}

/// Invokes `f(msg)`, catching any panic and logging it instead of letting it
/// propagate. Used for Fastboot's `on_info` callback.
pub(crate) fn guarded_info<F: FnMut(&T), T>(f: &mut F, msg: &T) {
    if catch_unwind(AssertUnwindSafe(|| f(msg))).is_err() {
        log::warn!("info callback panicked; ignoring");
    }
}
