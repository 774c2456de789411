// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::error::AgentError;

use std::sync::{Arc, Mutex};

const NAT_TABLE: &str = "nat";
const PREROUTING_CHAIN: &str = "PREROUTING";

/// Per-agent chain holding one positional rule per active match.
pub const AGENT_CHAIN: &str = "UPF";

/// The kernel side of the match table: a dedicated NAT chain addressed by
/// rule position, plus the PREROUTING jump that feeds it UE traffic.
pub trait NatChainOps: Send + Sync {
    /// Reset the agent chain and (re)attach its PREROUTING jump for the UE
    /// subnet, dropping whatever a previous run left behind.
    fn init(&self, ue_subnet: &str) -> Result<(), AgentError>;

    /// Insert a rule at the given zero-based position, shifting the rules
    /// below it down by one.
    fn insert_rule(&self, position: usize, rule_spec: &str) -> Result<(), AgentError>;

    /// Delete the rule at the given zero-based position.
    fn delete_rule(&self, position: usize) -> Result<(), AgentError>;

    /// Remove every rule from the agent chain.
    fn flush(&self) -> Result<(), AgentError>;
}

/// Production implementation backed by the system iptables binary.
pub struct IptablesNatChain {
    ipt: iptables::IPTables,
}

impl IptablesNatChain {
    pub fn new() -> Result<Self, AgentError> {
        let ipt = iptables::new(false).map_err(nat_error)?;
        Ok(Self { ipt })
    }
}

fn nat_error(err: Box<dyn std::error::Error>) -> AgentError {
    AgentError::Conflict(err.to_string())
}

impl NatChainOps for IptablesNatChain {
    fn init(&self, ue_subnet: &str) -> Result<(), AgentError> {
        // Drop any steering rule left over from a previous run, whatever
        // its selector was at the time.
        for rule in self.ipt.list(NAT_TABLE, PREROUTING_CHAIN).map_err(nat_error)? {
            if let Some(spec) = rule.strip_prefix(&format!("-A {PREROUTING_CHAIN} ")) {
                if spec.ends_with(&format!("-j {AGENT_CHAIN}")) {
                    self.ipt
                        .delete(NAT_TABLE, PREROUTING_CHAIN, spec)
                        .map_err(nat_error)?;
                }
            }
        }

        if self.ipt.chain_exists(NAT_TABLE, AGENT_CHAIN).map_err(nat_error)? {
            self.ipt
                .flush_chain(NAT_TABLE, AGENT_CHAIN)
                .map_err(nat_error)?;
        } else {
            self.ipt
                .new_chain(NAT_TABLE, AGENT_CHAIN)
                .map_err(nat_error)?;
        }

        // All traffic sourced from the UE subnet is steered through the
        // agent chain before anything else in PREROUTING.
        self.ipt
            .insert(
                NAT_TABLE,
                PREROUTING_CHAIN,
                &format!("-s {ue_subnet} -j {AGENT_CHAIN}"),
                1,
            )
            .map_err(nat_error)
    }

    fn insert_rule(&self, position: usize, rule_spec: &str) -> Result<(), AgentError> {
        // iptables rule numbers are one-based.
        self.ipt
            .insert(NAT_TABLE, AGENT_CHAIN, rule_spec, (position + 1) as i32)
            .map_err(nat_error)
    }

    fn delete_rule(&self, position: usize) -> Result<(), AgentError> {
        // -D accepts a bare rule number, which deletes by position rather
        // than by spec; identical specs at different positions stay safe.
        self.ipt
            .delete(NAT_TABLE, AGENT_CHAIN, &(position + 1).to_string())
            .map_err(nat_error)
    }

    fn flush(&self) -> Result<(), AgentError> {
        self.ipt
            .flush_chain(NAT_TABLE, AGENT_CHAIN)
            .map_err(nat_error)
    }
}

/* An in-memory NAT chain used for controlled unit tests. It enforces the
 * same positional constraints iptables does, so index mistakes fail in
 * tests the way they would on a real box.
 */
#[derive(Clone, Default)]
pub struct FakeNatChain {
    pub state: Arc<Mutex<FakeNatState>>,
}

#[derive(Default)]
pub struct FakeNatState {
    /// Rule specs, positional, mirroring the agent chain.
    pub chain: Vec<String>,
    /// The UE subnet the PREROUTING jump was installed for, if any.
    pub jump_subnet: Option<String>,
    /// Reject every insert, as iptables does when the chain is missing.
    pub fail_inserts: bool,
}

impl FakeNatChain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NatChainOps for FakeNatChain {
    fn init(&self, ue_subnet: &str) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        state.chain.clear();
        state.jump_subnet = Some(ue_subnet.to_string());
        Ok(())
    }

    fn insert_rule(&self, position: usize, rule_spec: &str) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_inserts {
            return Err(AgentError::Conflict("iptables: chain missing".to_string()));
        }
        if position > state.chain.len() {
            return Err(AgentError::Conflict(format!(
                "iptables: index of insertion too big ({position})"
            )));
        }
        state.chain.insert(position, rule_spec.to_string());
        Ok(())
    }

    fn delete_rule(&self, position: usize) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        if position >= state.chain.len() {
            return Err(AgentError::Conflict(format!(
                "iptables: no rule at position {position}"
            )));
        }
        state.chain.remove(position);
        Ok(())
    }

    fn flush(&self) -> Result<(), AgentError> {
        self.state.lock().unwrap().chain.clear();
        Ok(())
    }
}
