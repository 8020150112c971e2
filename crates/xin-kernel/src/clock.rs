//! Monotonic wall clock behind a narrow interface. The kernel never reads
//! the OS clock directly, so tests can shift time with [`mock_diff`].

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static MOCK_DIFF_NS: AtomicI64 = AtomicI64::new(0);
static LAST_NS: AtomicU64 = AtomicU64::new(0);

/// Current time in nanoseconds since the unix epoch, guaranteed never to
/// move backwards within the process.
pub fn now_ns() -> u64 {
    let real = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as i128;
    let shifted = real + MOCK_DIFF_NS.load(Ordering::Relaxed) as i128;
    let shifted = if shifted < 0 { 0 } else { shifted as u64 };
    LAST_NS
        .fetch_max(shifted, Ordering::SeqCst)
        .max(shifted)
}

/// Current time in seconds since the unix epoch.
pub fn now_unix() -> u64 {
    now_ns() / 1_000_000_000
}

/// Shift the clock by `diff` nanoseconds. Test hook only.
pub fn mock_diff(diff_ns: i64) {
    MOCK_DIFF_NS.store(diff_ns, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }
}
