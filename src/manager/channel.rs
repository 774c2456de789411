// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::error::AgentError;
use crate::manager::messages::ControlMessage;

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// How often a blocked inbound read wakes up so stop flags are observed.
const READ_TICK: Duration = Duration::from_secs(1);

/// One inbound read outcome: a complete frame, or a timeout tick.
#[derive(Debug)]
pub enum Inbound {
    Frame(String),
    Tick,
}

/// A connected manager session. Frames are newline-delimited JSON objects.
/// The writer half is shared and serialized, so command replies and
/// periodic sends never interleave on the wire.
pub struct ManagerConnection {
    reader: BufReader<TcpStream>,
    writer: MessageWriter,
    // Partial frame carried across read timeouts.
    pending: String,
}

#[derive(Clone)]
pub struct MessageWriter {
    stream: Arc<Mutex<TcpStream>>,
}

impl ManagerConnection {
    pub fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(READ_TICK))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: MessageWriter {
                stream: Arc::new(Mutex::new(stream)),
            },
            pending: String::new(),
        })
    }

    pub fn writer(&self) -> MessageWriter {
        self.writer.clone()
    }

    /// Read one frame, or a tick when the read timed out. A frame split
    /// across ticks keeps accumulating until its newline arrives.
    pub fn recv(&mut self) -> Result<Inbound, AgentError> {
        match self.reader.read_line(&mut self.pending) {
            Ok(0) => Err(closed()),
            Ok(_) => {
                if self.pending.ends_with('\n') {
                    Ok(Inbound::Frame(std::mem::take(&mut self.pending)))
                } else {
                    // EOF in the middle of a frame.
                    Err(closed())
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(Inbound::Tick)
            }
            Err(err) => Err(AgentError::Transport(err)),
        }
    }
}

fn closed() -> AgentError {
    AgentError::Transport(std::io::Error::new(
        ErrorKind::UnexpectedEof,
        "manager closed the connection",
    ))
}

impl MessageWriter {
    /// Serialize and send one message; the lock spans the whole frame.
    pub fn send(&self, message: &ControlMessage) -> Result<(), AgentError> {
        let mut frame = serde_json::to_string(message)
            .map_err(|err| AgentError::Protocol(err.to_string()))?;
        frame.push('\n');

        let mut stream = self.stream.lock().unwrap();
        stream.write_all(frame.as_bytes())?;
        stream.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    fn manager_pair() -> (ManagerConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().unwrap();
        let conn_thread = thread::spawn(move || {
            ManagerConnection::connect(&addr.to_string()).expect("connect")
        });
        let (server, _) = listener.accept().expect("accept");
        (conn_thread.join().expect("join"), server)
    }

    #[test]
    fn test_send_writes_one_frame_per_line() {
        let (conn, server) = manager_pair();
        let writer = conn.writer();
        writer.send(&ControlMessage::hello(5)).expect("send");
        writer.send(&ControlMessage::match_ok(0)).expect("send");

        let mut reader = BufReader::new(server);
        let mut line = String::new();
        reader.read_line(&mut line).expect("read");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&line).expect("json")["type"],
            "hello"
        );
        line.clear();
        reader.read_line(&mut line).expect("read");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&line).expect("json")["type"],
            "match_ok"
        );
    }

    #[test]
    fn test_recv_frame() {
        let (mut conn, mut server) = manager_pair();
        server.write_all(b"{\"type\":\"match_delete\"}\n").expect("write");
        match conn.recv().expect("recv") {
            Inbound::Frame(frame) => assert_eq!(frame, "{\"type\":\"match_delete\"}\n"),
            Inbound::Tick => panic!("expected a frame"),
        }
    }

    #[test]
    fn test_recv_ticks_while_idle() {
        let (mut conn, _server) = manager_pair();
        let start = Instant::now();
        assert!(matches!(conn.recv().expect("recv"), Inbound::Tick));
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[test]
    fn test_recv_reassembles_split_frame() {
        let (mut conn, mut server) = manager_pair();
        server.write_all(b"{\"type\":").expect("write");

        // The first half arrives, then the read times out.
        assert!(matches!(conn.recv().expect("recv"), Inbound::Tick));

        server.write_all(b"\"match_delete\"}\n").expect("write");
        match conn.recv().expect("recv") {
            Inbound::Frame(frame) => assert_eq!(frame, "{\"type\":\"match_delete\"}\n"),
            Inbound::Tick => panic!("expected a frame"),
        }
    }

    #[test]
    fn test_recv_detects_close() {
        let (mut conn, server) = manager_pair();
        drop(server);
        let err = conn.recv().unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)), "got {err:?}");
    }
}
