// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use libc::{clock_gettime, timespec, CLOCK_BOOTTIME};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

pub trait Clock: Send {
    /// Microseconds elapsed since an arbitrary fixed origin.
    fn now_us(&self) -> u64;

    fn sleep(&mut self, span: Duration) {
        thread::sleep(span);
    }
}

/// Monotonic clock that keeps counting across system suspend.
pub struct SystemBootClock;

impl Clock for SystemBootClock {
    fn now_us(&self) -> u64 {
        let mut spec: timespec = unsafe { mem::zeroed() };
        let result = unsafe { clock_gettime(CLOCK_BOOTTIME, &mut spec) };
        if result != 0 {
            return 0;
        }
        spec.tv_sec as u64 * 1_000_000 + spec.tv_nsec as u64 / 1000
    }
}

// A clock used to deterministically control time in unit tests.
#[derive(Clone, Default)]
pub struct FakeClock {
    pub now_us: u64,
}

impl Clock for FakeClock {
    fn now_us(&self) -> u64 {
        self.now_us
    }

    fn sleep(&mut self, span: Duration) {
        self.now_us += span.as_micros() as u64;
    }
}

/// Sleep in one-second fragments, giving up as soon as the stop flag is
/// raised. Returns false when interrupted.
pub fn interruptible_sleep(stop: &AtomicBool, span: Duration) -> bool {
    let mut remaining_us = span.as_micros() as u64;
    while remaining_us > 0 {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let fragment_us = remaining_us.min(1_000_000);
        thread::sleep(Duration::from_micros(fragment_us));
        remaining_us -= fragment_us;
    }
    !stop.load(Ordering::Relaxed)
}
