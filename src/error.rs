// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Failure taxonomy shared by both backing stores and both peers.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Connection-level failure toward the manager or the forwarding engine.
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    /// The forwarding engine spoke something other than its control protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A backing-store write was rejected.
    #[error("backing store rejected write: {0}")]
    Conflict(String),

    /// A delete referenced a position with no active rule.
    #[error("no match at index {0}")]
    NotFound(i64),

    /// The UE session table could not be read.
    #[error("uemap poll failed: {0}")]
    Poll(String),
}
