// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod control_socket;
pub mod uemap;

pub use control_socket::{ControlSocket, CLICK_BANNER};
pub use uemap::{UeMap, UeMapPoller, UeSession};

use crate::error::AgentError;

use hashbrown::HashMap;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};

/// Read/write access to the forwarding engine's element handlers.
/// Both calls return the engine's status code together with the status
/// text (writes) or the payload (successful reads).
pub trait ControlHandlers: Send + Sync {
    fn write_handler(&self, handler: &str, value: &str) -> Result<(u16, String), AgentError>;
    fn read_handler(&self, handler: &str) -> Result<(u16, String), AgentError>;
}

/* An in-memory engine stand-in used for controlled unit tests.
 *
 * It keeps the positional match table the way the real matchmap element
 * would, so tests can compare it entry-by-entry against the kernel side.
 *
 * Usage:
 *      let fake = FakeHandlers::new();
 *      fake.state.lock().unwrap().reads.insert("uemap".into(), (200, data));
 *
 *      // Share with the object under test by cloning it.
 *      ... fake.clone() ...
 *
 *      assert_eq!(fake.state.lock().unwrap().table, expected);
 */
#[derive(Clone, Default)]
pub struct FakeHandlers {
    pub state: Arc<Mutex<FakeEngineState>>,
}

#[derive(Default)]
pub struct FakeEngineState {
    /// Positional match table, one encoded match per active entry.
    pub table: Vec<String>,
    /// Canned replies for read_handler, keyed by handler name.
    pub reads: HashMap<String, (u16, String)>,
    /// Every write received, in order, as (handler, value).
    pub write_log: Vec<(String, String)>,
    /// Reply 520 to every write without touching the table.
    pub fail_writes: bool,
    /// Fail every call at the transport level, as if the engine were down.
    pub refuse: bool,
}

impl FakeHandlers {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ControlHandlers for FakeHandlers {
    fn write_handler(&self, handler: &str, value: &str) -> Result<(u16, String), AgentError> {
        let mut state = self.state.lock().unwrap();
        if state.refuse {
            return Err(AgentError::Transport(std::io::Error::new(
                ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        state.write_log.push((handler.to_string(), value.to_string()));
        if state.fail_writes {
            return Ok((520, "Write handler error".to_string()));
        }
        match handler {
            "matchmapclear" => state.table.clear(),
            "matchmapinsert" => {
                let index: usize = match value.split(',').next().and_then(|i| i.parse().ok()) {
                    Some(index) => index,
                    None => return Ok((520, format!("bad match encoding: {value}"))),
                };
                if index > state.table.len() {
                    return Ok((520, format!("index {index} out of range")));
                }
                state.table.insert(index, value.to_string());
            }
            "matchmapdelete" => {
                let index: usize = match value.parse() {
                    Ok(index) => index,
                    Err(_) => return Ok((520, format!("bad index: {value}"))),
                };
                if index >= state.table.len() {
                    return Ok((520, format!("index {index} out of range")));
                }
                state.table.remove(index);
            }
            _ => return Ok((511, "No such handler".to_string())),
        }
        Ok((200, "Write handler OK".to_string()))
    }

    fn read_handler(&self, handler: &str) -> Result<(u16, String), AgentError> {
        let state = self.state.lock().unwrap();
        if state.refuse {
            return Err(AgentError::Transport(std::io::Error::new(
                ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(state
            .reads
            .get(handler)
            .cloned()
            .unwrap_or((511, "No such handler".to_string())))
    }
}
