// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::click::ControlHandlers;
use crate::error::AgentError;
use crate::matchmap::match_rule::Match;
use crate::matchmap::nat_chain::NatChainOps;
use crate::utils::interruptible_sleep;

use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// How long to wait between probes while the engine is still coming up.
const ENGINE_RETRY_PERIOD: Duration = Duration::from_secs(5);

/// Owns the ordered set of active matches and keeps its two backing stores
/// - the engine's match table and the kernel NAT chain - positionally
/// identical. All structural mutations serialize on one lock; interleaved
/// mutations would corrupt the shared index space.
pub struct MatchMap<H: ControlHandlers, N: NatChainOps> {
    click: H,
    nat: N,
    ue_subnet: String,
    table: Mutex<Vec<Match>>,
    stop: Arc<AtomicBool>,
}

impl<H: ControlHandlers, N: NatChainOps> MatchMap<H, N> {
    pub fn new(click: H, nat: N, ue_subnet: String, stop: Arc<AtomicBool>) -> Self {
        Self {
            click,
            nat,
            ue_subnet,
            table: Mutex::new(Vec::new()),
            stop,
        }
    }

    /// Block until the engine accepts a matchmapclear, then reset the
    /// kernel chain. No command is served before both stores are empty;
    /// this ordering also guarantees no stale rule in either store
    /// survives an agent restart.
    pub fn start(&self) -> Result<(), AgentError> {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            match self.click.write_handler("matchmapclear", "0") {
                Ok((200, _)) => break,
                Ok((status, reason)) => {
                    info!(status, reason = reason.as_str(); "Engine refused matchmapclear, retrying")
                }
                Err(err) => {
                    info!(err = err.to_string(); "Waiting for the forwarding engine to start...")
                }
            }
            if !interruptible_sleep(&self.stop, ENGINE_RETRY_PERIOD) {
                return Ok(());
            }
        }

        self.nat.init(&self.ue_subnet)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Install a match in both stores, engine first: a rejected engine
    /// write must leave the kernel untouched.
    pub fn add_match(&self, m: &Match) -> Result<(), AgentError> {
        let mut table = self.table.lock().unwrap();

        let (status, reason) = self
            .click
            .write_handler("matchmapinsert", &m.click_encoding())?;
        if status != 200 {
            return Err(AgentError::Conflict(reason));
        }

        let rule_spec = m.nat_rule_spec()?;
        debug!(index = m.index, rule_spec = rule_spec.as_str(); "Inserting NAT rule");
        self.nat.insert_rule(m.index, &rule_spec)?;

        // The kernel accepted the position, so index <= table.len() holds.
        table.insert(m.index, m.clone());
        Ok(())
    }

    /// Remove the match at a position, or clear everything with the -1
    /// sentinel. Deleting position i shifts every higher position down by
    /// one in both stores; mass removal must use the sentinel.
    pub fn delete_match(&self, match_index: i64) -> Result<(), AgentError> {
        let mut table = self.table.lock().unwrap();

        let handler = if match_index == -1 {
            self.nat.flush()?;
            "matchmapclear"
        } else {
            let index = usize::try_from(match_index)
                .map_err(|_| AgentError::NotFound(match_index))?;
            if index >= table.len() {
                return Err(AgentError::NotFound(match_index));
            }
            self.nat.delete_rule(index)?;
            "matchmapdelete"
        };

        let (status, reason) = self
            .click
            .write_handler(handler, &match_index.to_string())?;
        if status != 200 {
            return Err(AgentError::Conflict(reason));
        }

        if match_index == -1 {
            table.clear();
        } else {
            table.remove(match_index as usize);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().unwrap().is_empty()
    }

    /// Snapshot of the active table, for reporting without holding the lock.
    pub fn snapshot(&self) -> Vec<Match> {
        self.table.lock().unwrap().clone()
    }
}
