// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::utils::Clock;

use log::debug;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{
    atomic::{AtomicBool, Ordering as AtomicOrd},
    Arc,
};
use std::time::Duration;

pub type EventId = u32;
pub const EXIT_EVENT: EventId = 0;

/// Multiplexes the agent's periodic activities onto one thread, waking it
/// for whichever event is due next.
pub struct EventTimer<C: Clock> {
    clock: C,
    last_id: EventId,
    events: BinaryHeap<PeriodicEvent>,
    exit_flag: Option<Arc<AtomicBool>>,
}

impl<C: Clock> EventTimer<C> {
    pub fn new(clock: C) -> Self {
        EventTimer {
            clock,
            last_id: EXIT_EVENT,
            events: BinaryHeap::new(),
            exit_flag: None,
        }
    }

    pub fn set_exit_flag(&mut self, flag: Arc<AtomicBool>) {
        self.exit_flag = Some(flag);
    }

    // Returns a new event ID to be invoked at a cadence of the given period +/- jitter.
    pub fn add_event(&mut self, period: Duration, jitter: Duration) -> EventId {
        self.last_id += 1;
        let mut event = PeriodicEvent {
            id: self.last_id,
            period_us: period.as_micros().try_into().unwrap(),
            jitter_us: jitter.as_micros().try_into().unwrap(),
            next_invocation: 0,
        };
        event.choose_next_invocation(self.clock.now_us());
        self.events.push(event);
        self.last_id
    }

    // Sleeps until returning the next event ID that should be invoked.
    pub fn await_next_event(&mut self) -> EventId {
        let next_event = self.events.pop();

        if let Some(mut event) = next_event {
            let event_id = event.id;

            let now = self.clock.now_us();
            if event.next_invocation > now && self.try_sleep(event.next_invocation, now).is_err() {
                return EXIT_EVENT;
            }
            event.choose_next_invocation(self.clock.now_us());
            self.events.push(event);

            event_id
        } else {
            EXIT_EVENT
        }
    }

    fn try_sleep(&mut self, until_us: u64, mut now_us: u64) -> Result<(), ()> {
        debug!("Waiting {:?} until the next event...", Duration::from_micros(until_us - now_us));

        while until_us > now_us {
            // Fragmented so the exit flag is observed within a second.
            let fragment_us = (until_us - now_us).min(1_000_000);
            self.clock.sleep(Duration::from_micros(fragment_us));

            now_us += fragment_us;
            if let Some(exit_flag) = &self.exit_flag {
                if exit_flag.load(AtomicOrd::Relaxed) {
                    return Err(());
                }
            }
        }

        Ok(())
    }
}

struct PeriodicEvent {
    id: EventId,
    period_us: u64,
    jitter_us: u64,
    next_invocation: u64,
}

impl PeriodicEvent {
    // Sets this event's next invocation to be within +/- jitter one period from now.
    fn choose_next_invocation(&mut self, now_us: u64) {
        self.next_invocation = now_us + self.period_us;
        if self.jitter_us > 0 {
            let spread = rand::thread_rng().gen_range(0..=self.jitter_us * 2);
            self.next_invocation = (self.next_invocation + spread).saturating_sub(self.jitter_us);
        }
    }
}

// The heap is a max-heap, so order events by reversed invocation time to
// surface the soonest one first.
impl Ord for PeriodicEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other.next_invocation.cmp(&self.next_invocation)
    }
}

impl PartialOrd for PeriodicEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PeriodicEvent {
    fn eq(&self, other: &Self) -> bool {
        self.next_invocation == other.next_invocation
    }
}

impl Eq for PeriodicEvent {}
