// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod map;
pub mod match_rule;
pub mod nat_chain;

pub use map::MatchMap;
pub use match_rule::Match;
pub use nat_chain::{FakeNatChain, IptablesNatChain, NatChainOps};
