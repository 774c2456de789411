// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::click::uemap::UeMap;
use crate::matchmap::match_rule::Match;

use serde::{Deserialize, Serialize};

/// Control-channel protocol version.
pub const PT_VERSION: u8 = 0;

// agent to manager
pub const PT_HELLO: &str = "hello";
pub const PT_UE_MAP: &str = "ue_map";
pub const PT_MATCH_OK: &str = "match_ok";
pub const PT_MATCH_KO: &str = "match_ko";

// manager to agent
pub const PT_MATCH_ADD: &str = "match_add";
pub const PT_MATCH_DELETE: &str = "match_delete";

/// Envelope exchanged with the manager: `{version, type, ...payload}`,
/// one JSON object per frame.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Hello {
        version: u8,
        every: u64,
    },
    /// The full UE session table, flattened into the envelope so each UE
    /// address is a top-level key.
    UeMap {
        version: u8,
        #[serde(flatten)]
        ues: UeMap,
    },
    MatchOk {
        version: u8,
        match_index: i64,
    },
    MatchKo {
        version: u8,
        match_index: i64,
    },
    MatchAdd {
        version: u8,
        #[serde(rename = "match")]
        rule: Match,
    },
    MatchDelete {
        version: u8,
        match_index: i64,
    },
}

impl ControlMessage {
    pub fn hello(every: u64) -> Self {
        ControlMessage::Hello {
            version: PT_VERSION,
            every,
        }
    }

    pub fn ue_map(ues: UeMap) -> Self {
        ControlMessage::UeMap {
            version: PT_VERSION,
            ues,
        }
    }

    pub fn match_ok(match_index: i64) -> Self {
        ControlMessage::MatchOk {
            version: PT_VERSION,
            match_index,
        }
    }

    pub fn match_ko(match_index: i64) -> Self {
        ControlMessage::MatchKo {
            version: PT_VERSION,
            match_index,
        }
    }
}
