// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

//! ClockAdapter: UTC "now", timestamp arithmetic, sleeps (spec.md §2).
//!
//! Kept behind a trait so scenario tests can drive the controller through
//! S1-style stand-down and S4-style reveal-window ticks without real time
//! passing.

use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait ClockAdapter: Send + Sync {
    /// Current UTC time, as Unix seconds.
    fn now(&self) -> i64;

    async fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

#[async_trait]
impl ClockAdapter for SystemClock {
    fn now(&self) -> i64 {
        time::OffsetDateTime::now_utc().unix_timestamp()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock whose `now()` is set by the test driving it; `sleep` is a no-op
/// since scenario tests advance time by calling `set` directly.
#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[derive(Debug, Default)]
    pub struct MockClock {
        now: AtomicI64,
    }

    impl MockClock {
        pub fn new(start: i64) -> Self {
            MockClock {
                now: AtomicI64::new(start),
            }
        }

        pub fn set(&self, t: i64) {
            self.now.store(t, Ordering::SeqCst);
        }

        pub fn advance(&self, secs: i64) {
            self.now.fetch_add(secs, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ClockAdapter for MockClock {
        fn now(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }

        async fn sleep(&self, _duration: Duration) {}
    }
}
