// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::click::{ControlHandlers, UeMapPoller};
use crate::error::AgentError;
use crate::manager::channel::{Inbound, ManagerConnection, MessageWriter};
use crate::manager::messages::{ControlMessage, PT_MATCH_ADD, PT_MATCH_DELETE};
use crate::matchmap::{Match, MatchMap, NatChainOps};
use crate::utils::event_timer::EXIT_EVENT;
use crate::utils::{interruptible_sleep, EventTimer, SystemBootClock};

use log::{debug, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Endpoints and cadences for one agent instance.
pub struct AgentConfig {
    /// Manager endpoint, host:port.
    pub manager_addr: String,
    /// Seconds between hello messages; also the reconnect backoff.
    pub hello_secs: u64,
    /// Seconds between UE session-table polls.
    pub poll_secs: u64,
    /// Seconds by which the poll period may vary.
    pub poll_jitter_secs: u64,
}

/// Owns the manager link. While connected, a periodic worker pushes hello
/// and session-report messages, and the inbound loop applies steering
/// commands to the shared match map, answering each with ok/ko.
pub struct ManagerAgent<H, N>
where
    H: ControlHandlers + Clone + Send + 'static,
    N: NatChainOps + 'static,
{
    config: AgentConfig,
    matchmap: Arc<MatchMap<H, N>>,
    poller: UeMapPoller<H>,
    stop: Arc<AtomicBool>,
}

impl<H, N> ManagerAgent<H, N>
where
    H: ControlHandlers + Clone + Send + 'static,
    N: NatChainOps + 'static,
{
    pub fn new(
        config: AgentConfig,
        matchmap: Arc<MatchMap<H, N>>,
        poller: UeMapPoller<H>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            matchmap,
            poller,
            stop,
        }
    }

    /// Supervisor: connect, serve the session until the link drops, back
    /// off one hello period, repeat. Returns only once stopped.
    pub fn run(&self) {
        let addr = self.config.manager_addr.as_str();
        while !self.stop.load(Ordering::Relaxed) {
            info!(addr; "Trying to connect to the manager");
            match ManagerConnection::connect(addr) {
                Ok(conn) => {
                    info!(addr; "Manager link established");
                    self.serve(conn);
                    info!(addr; "Manager link closed");
                }
                Err(err) => {
                    info!(err = err.to_string(), addr; "Unable to connect")
                }
            }
            interruptible_sleep(&self.stop, Duration::from_secs(self.config.hello_secs));
        }
    }

    // One connected session: periodic worker plus the inbound loop. The
    // session-done flag retires the worker before a reconnect attempt, so
    // at most one instance of each loop is ever alive.
    fn serve(&self, mut conn: ManagerConnection) {
        let session_done = Arc::new(AtomicBool::new(false));
        let worker = self.spawn_periodic_worker(conn.writer(), Arc::clone(&session_done));

        let writer = conn.writer();
        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            match conn.recv() {
                Ok(Inbound::Tick) => continue,
                Ok(Inbound::Frame(frame)) => self.dispatch(&frame, &writer),
                Err(err) => {
                    info!(err = err.to_string(); "Manager connection failed");
                    break;
                }
            }
        }

        session_done.store(true, Ordering::Relaxed);
        if worker.join().is_err() {
            warn!("Periodic worker panicked");
        }
    }

    fn spawn_periodic_worker(
        &self,
        writer: MessageWriter,
        session_done: Arc<AtomicBool>,
    ) -> thread::JoinHandle<()> {
        let poller = self.poller.clone();
        let hello_secs = self.config.hello_secs;
        let poll_secs = self.config.poll_secs;
        let poll_jitter_secs = self.config.poll_jitter_secs;

        thread::spawn(move || {
            let mut timer = EventTimer::new(SystemBootClock {});
            timer.set_exit_flag(session_done);
            let hello_event = timer.add_event(Duration::from_secs(hello_secs), Duration::ZERO);
            let report_event = timer.add_event(
                Duration::from_secs(poll_secs),
                Duration::from_secs(poll_jitter_secs),
            );

            loop {
                let event = timer.await_next_event();
                if event == EXIT_EVENT {
                    return;
                } else if event == hello_event {
                    if let Err(err) = writer.send(&ControlMessage::hello(hello_secs)) {
                        info!(err = err.to_string(); "Cannot send hello");
                    }
                } else if event == report_event {
                    match poller.poll() {
                        Ok(uemap) => {
                            debug!(sessions = uemap.len(); "Publishing the UE map");
                            if let Err(err) = writer.send(&ControlMessage::ue_map(uemap)) {
                                info!(err = err.to_string(); "Cannot send ue map updates");
                            }
                        }
                        Err(err) => info!(err = err.to_string(); "Cannot poll the ue map"),
                    }
                }
            }
        })
    }

    // One inbound frame: parse, dispatch by type. Anything unknown or
    // unparseable is logged and dropped; only commands get a reply.
    fn dispatch(&self, frame: &str, writer: &MessageWriter) {
        let message: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(err) => {
                info!(err = err.to_string(); "Invalid input from the manager");
                return;
            }
        };
        match message["type"].as_str() {
            Some(PT_MATCH_ADD) => self.handle_match_add(&message, writer),
            Some(PT_MATCH_DELETE) => self.handle_match_delete(&message, writer),
            Some(other) => info!(kind = other; "Unknown message type"),
            None => info!("Message without a type from the manager"),
        }
    }

    fn handle_match_add(&self, message: &Value, writer: &MessageWriter) {
        // Best effort: report the declared index even when the payload
        // fails validation further down, -1 when even that is missing.
        let index = message["match"]["index"].as_i64().unwrap_or(-1);
        info!(index; "Received match_add");

        let result = serde_json::from_value::<Match>(message["match"].clone())
            .map_err(|err| AgentError::Conflict(err.to_string()))
            .and_then(|m| self.matchmap.add_match(&m));
        self.reply(writer, index, result, "adding");
    }

    fn handle_match_delete(&self, message: &Value, writer: &MessageWriter) {
        let index = message["match_index"].as_i64().unwrap_or(-1);
        info!(index; "Received match_delete");

        let result = match message["match_index"].as_i64() {
            Some(requested) => self.matchmap.delete_match(requested),
            None => Err(AgentError::NotFound(-1)),
        };
        self.reply(writer, index, result, "deleting");
    }

    fn reply(
        &self,
        writer: &MessageWriter,
        index: i64,
        result: Result<(), AgentError>,
        action: &str,
    ) {
        let reply = match result {
            Ok(()) => ControlMessage::match_ok(index),
            Err(err) => {
                info!(err = err.to_string(), action; "Matchmap operation failed");
                ControlMessage::match_ko(index)
            }
        };
        if let Err(err) = writer.send(&reply) {
            warn!(err = err.to_string(); "Cannot send the match result");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::click::FakeHandlers;
    use crate::matchmap::nat_chain::FakeNatChain;

    use serde_json::json;
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};

    struct Harness {
        agent: ManagerAgent<FakeHandlers, FakeNatChain>,
        conn: ManagerConnection,
        manager: BufReader<TcpStream>,
        // Shared handle on the fake engine, for canned reads.
        click: FakeHandlers,
    }

    fn harness() -> Harness {
        let stop = Arc::new(AtomicBool::new(false));
        let click = FakeHandlers::new();
        let matchmap = Arc::new(MatchMap::new(
            click.clone(),
            FakeNatChain::new(),
            "10.0.0.0/8".to_string(),
            Arc::clone(&stop),
        ));
        matchmap.start().expect("start");

        let agent = ManagerAgent::new(
            AgentConfig {
                manager_addr: "unused".to_string(),
                hello_secs: 1,
                poll_secs: 1,
                poll_jitter_secs: 0,
            },
            matchmap,
            UeMapPoller::new(click.clone()),
            stop,
        );

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().unwrap();
        let conn_thread = thread::spawn(move || {
            ManagerConnection::connect(&addr.to_string()).expect("connect")
        });
        let (manager, _) = listener.accept().expect("accept");
        Harness {
            agent,
            conn: conn_thread.join().expect("join"),
            manager: BufReader::new(manager),
            click,
        }
    }

    fn reply_for(harness: &mut Harness, frame: Value) -> Value {
        let writer = harness.conn.writer();
        harness.agent.dispatch(&frame.to_string(), &writer);
        let mut line = String::new();
        harness.manager.read_line(&mut line).expect("reply");
        serde_json::from_str(&line).expect("json")
    }

    fn add_frame(index: i64) -> Value {
        json!({
            "version": 0,
            "type": "match_add",
            "match": {
                "index": index,
                "ip_proto_num": 6,
                "dst_ip": "5.5.5.5",
                "netmask": "32",
                "dst_port": 80,
                "new_dst_ip": "",
                "new_dst_port": 0,
            },
        })
    }

    #[test]
    fn test_match_add_replies_ok() {
        let mut harness = harness();
        let reply = reply_for(&mut harness, add_frame(0));
        assert_eq!(reply, json!({"version": 0, "type": "match_ok", "match_index": 0}));
        assert_eq!(harness.agent.matchmap.len(), 1);
    }

    #[test]
    fn test_match_add_failure_replies_ko_with_index() {
        let mut harness = harness();
        // Index 7 cannot be inserted into an empty table.
        let reply = reply_for(&mut harness, add_frame(7));
        assert_eq!(reply, json!({"version": 0, "type": "match_ko", "match_index": 7}));
        assert!(harness.agent.matchmap.is_empty());
    }

    #[test]
    fn test_match_add_unparseable_payload_replies_ko_minus_one() {
        let mut harness = harness();
        let frame = json!({"version": 0, "type": "match_add", "match": {"dst_ip": "5.5.5.5"}});
        let reply = reply_for(&mut harness, frame);
        assert_eq!(reply["type"], "match_ko");
        assert_eq!(reply["match_index"], -1);
    }

    #[test]
    fn test_match_delete_replies() {
        let mut harness = harness();
        reply_for(&mut harness, add_frame(0));

        let frame = json!({"version": 0, "type": "match_delete", "match_index": 0});
        let reply = reply_for(&mut harness, frame);
        assert_eq!(reply, json!({"version": 0, "type": "match_ok", "match_index": 0}));
        assert!(harness.agent.matchmap.is_empty());

        let frame = json!({"version": 0, "type": "match_delete", "match_index": 0});
        let reply = reply_for(&mut harness, frame);
        assert_eq!(reply["type"], "match_ko");
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let mut harness = harness();
        let writer = harness.conn.writer();
        harness
            .agent
            .dispatch(&json!({"version": 0, "type": "caps_update"}).to_string(), &writer);
        harness.agent.dispatch("not even json", &writer);

        // Only the follow-up command yields a reply, proving the frames
        // above produced none.
        let reply = reply_for(&mut harness, add_frame(0));
        assert_eq!(reply["type"], "match_ok");
    }

    #[test]
    fn test_session_serves_commands_and_heartbeats() {
        let Harness {
            agent,
            conn,
            mut manager,
            click,
        } = harness();

        click.state.lock().unwrap().reads.insert(
            "uemap".to_string(),
            (200, "10.0.0.1,1.2.3.4,5,9.9.9.9,6\n".to_string()),
        );

        let stop = Arc::clone(&agent.stop);
        let serve_thread = thread::spawn(move || agent.serve(conn));

        manager
            .get_mut()
            .write_all((add_frame(0).to_string() + "\n").as_bytes())
            .expect("command");

        // Expect the match_ok reply plus, within the first couple of
        // periods, at least one hello and one ue_map report.
        let mut seen_ok = false;
        let mut seen_hello = false;
        let mut seen_ue_map = false;
        while !(seen_ok && seen_hello && seen_ue_map) {
            let mut line = String::new();
            manager.read_line(&mut line).expect("frame");
            let frame: Value = serde_json::from_str(&line).expect("json");
            match frame["type"].as_str().unwrap() {
                "match_ok" => seen_ok = true,
                "hello" => {
                    assert_eq!(frame["every"], 1);
                    seen_hello = true;
                }
                "ue_map" => {
                    assert_eq!(frame["10.0.0.1"]["teid_uplink"], "6");
                    seen_ue_map = true;
                }
                other => panic!("unexpected frame type {other}"),
            }
        }

        stop.store(true, Ordering::Relaxed);
        serve_thread.join().expect("join");
    }
}
