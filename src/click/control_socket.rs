// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::click::ControlHandlers;
use crate::error::AgentError;

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;

/// The banner every control-socket connection opens with. Anything else
/// means the peer is not the forwarding engine we expect.
pub const CLICK_BANNER: &str = "Click::ControlSocket/1.3\n";

/// Client for the engine's line-oriented control socket. The protocol is
/// single-exchange, so every handler access dials a fresh connection.
/// Calls block until the engine responds; retry policy belongs to callers.
#[derive(Clone, Debug)]
pub struct ControlSocket {
    host: String,
    port: u16,
    element: String,
}

impl ControlSocket {
    pub fn new(host: String, port: u16, element: String) -> Self {
        Self {
            host,
            port,
            element,
        }
    }

    fn connect(&self) -> Result<BufReader<TcpStream>, AgentError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        let mut reader = BufReader::new(stream);

        let mut banner = String::new();
        reader.read_line(&mut banner)?;
        if banner != CLICK_BANNER {
            return Err(AgentError::Protocol(format!(
                "unexpected banner: {banner:?}"
            )));
        }
        Ok(reader)
    }

    fn send_command(
        reader: &mut BufReader<TcpStream>,
        command: &str,
    ) -> Result<(u16, String), AgentError> {
        reader.get_mut().write_all(command.as_bytes())?;

        // The engine may emit informational lines before the status line.
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Err(AgentError::Protocol(
                    "connection closed before a status line".to_string(),
                ));
            }
            if let Some(reply) = parse_status_line(&line) {
                return Ok(reply);
            }
        }
    }
}

impl ControlHandlers for ControlSocket {
    fn write_handler(&self, handler: &str, value: &str) -> Result<(u16, String), AgentError> {
        let mut reader = self.connect()?;
        let command = format!("write {}.{} {}\n", self.element, handler, value);
        Self::send_command(&mut reader, &command)
    }

    fn read_handler(&self, handler: &str) -> Result<(u16, String), AgentError> {
        let mut reader = self.connect()?;
        let command = format!("read {}.{}\n", self.element, handler);
        let (status, text) = Self::send_command(&mut reader, &command)?;
        if status != 200 {
            return Ok((status, text));
        }

        let mut data_line = String::new();
        if reader.read_line(&mut data_line)? == 0 {
            return Err(AgentError::Protocol(
                "connection closed before the DATA line".to_string(),
            ));
        }
        let length = parse_data_line(&data_line)?;

        let mut payload = vec![0u8; length];
        reader.read_exact(&mut payload)?;
        let data = String::from_utf8(payload)
            .map_err(|err| AgentError::Protocol(format!("payload is not valid UTF-8: {err}")))?;
        Ok((status, data))
    }
}

// "<3-digit code> <text>", e.g. "200 Write handler 'upfr.matchmapinsert' OK".
fn parse_status_line(line: &str) -> Option<(u16, String)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let bytes = line.as_bytes();
    if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) || bytes[3] != b' ' {
        return None;
    }
    let code = line[..3].parse().ok()?;
    Some((code, line[4..].to_string()))
}

// "DATA <byte-length>", announcing the payload of a successful read.
fn parse_data_line(line: &str) -> Result<usize, AgentError> {
    let rest = line
        .trim_end_matches(['\r', '\n'])
        .strip_prefix("DATA ")
        .ok_or_else(|| AgentError::Protocol(format!("expected a DATA line, got {line:?}")))?;
    rest.trim()
        .parse()
        .map_err(|_| AgentError::Protocol(format!("bad DATA length: {rest:?}")))
}
