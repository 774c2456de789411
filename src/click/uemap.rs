// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::click::ControlHandlers;
use crate::error::AgentError;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// One subscriber mapping as exported by the engine's uemap handler:
/// the UE address with its tunnel endpoints on the access and core sides.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct UeSession {
    pub ue_ip: String,
    pub enb_ip: String,
    pub teid_downlink: String,
    pub epc_ip: String,
    pub teid_uplink: String,
}

pub type UeMap = HashMap<String, UeSession>;

/// Reads the engine's full UE session table. Every poll produces a complete
/// replacement table, not a diff.
#[derive(Clone)]
pub struct UeMapPoller<H: ControlHandlers> {
    click: H,
}

impl<H: ControlHandlers> UeMapPoller<H> {
    pub fn new(click: H) -> Self {
        Self { click }
    }

    pub fn poll(&self) -> Result<UeMap, AgentError> {
        let (status, data) = self.click.read_handler("uemap")?;
        if status != 200 {
            return Err(AgentError::Poll(format!(
                "uemap read returned {status}: {data}"
            )));
        }
        Ok(parse_uemap(&data))
    }
}

// Newline-separated records of (ue_ip, enb_ip, teid_downlink, epc_ip,
// teid_uplink). Missing trailing fields stay empty; the last record for a
// UE address wins.
fn parse_uemap(data: &str) -> UeMap {
    let mut uemap = UeMap::new();
    for record in data.split('\n') {
        if record.is_empty() {
            continue;
        }
        let mut fields = record.split(',');
        let session = UeSession {
            ue_ip: fields.next().unwrap_or("").to_string(),
            enb_ip: fields.next().unwrap_or("").to_string(),
            teid_downlink: fields.next().unwrap_or("").to_string(),
            epc_ip: fields.next().unwrap_or("").to_string(),
            teid_uplink: fields.next().unwrap_or("").to_string(),
        };
        uemap.insert(session.ue_ip.clone(), session);
    }
    uemap
}
