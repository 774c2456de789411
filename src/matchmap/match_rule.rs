// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::error::AgentError;

use serde::{Deserialize, Serialize};

// Protocols whose kernel port matching has a match extension of its own.
fn port_match_extension(ip_proto_num: u8) -> Option<&'static str> {
    match ip_proto_num {
        6 => Some("tcp"),
        17 => Some("udp"),
        132 => Some("sctp"),
        _ => None,
    }
}

/// A steering rule assigned by the manager. The index is both its identity
/// and its position in the engine match table and the kernel chain.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Match {
    pub index: usize,
    pub ip_proto_num: u8,
    pub dst_ip: String,
    pub netmask: String,
    #[serde(default)]
    pub dst_port: u16,
    /// Empty means pass-through; otherwise the destination is rewritten.
    #[serde(default)]
    pub new_dst_ip: String,
    /// Only meaningful with new_dst_ip; 0 keeps the original port.
    #[serde(default)]
    pub new_dst_port: u16,
}

impl Match {
    /// Value handed to the engine's matchmapinsert handler. The port field
    /// is always present; 0 means any.
    pub fn click_encoding(&self) -> String {
        format!(
            "{},{}-{}/{}-{}",
            self.index, self.ip_proto_num, self.dst_ip, self.netmask, self.dst_port
        )
    }

    pub fn is_rewrite(&self) -> bool {
        !self.new_dst_ip.is_empty()
    }

    /// The kernel rule for this match: destination selector, an optional
    /// port match, and a DNAT or ACCEPT target.
    pub fn nat_rule_spec(&self) -> Result<String, AgentError> {
        let mut spec = format!("-p {} -d {}/{}", self.ip_proto_num, self.dst_ip, self.netmask);

        if self.dst_port != 0 {
            let extension = port_match_extension(self.ip_proto_num).ok_or_else(|| {
                AgentError::Conflict(format!(
                    "no port match extension for protocol {}",
                    self.ip_proto_num
                ))
            })?;
            spec.push_str(&format!(" -m {} --dport {}", extension, self.dst_port));
        }

        if self.is_rewrite() {
            spec.push_str(&format!(" -j DNAT --to-destination {}", self.new_dst_ip));
            if self.new_dst_port != 0 {
                spec.push_str(&format!(":{}", self.new_dst_port));
            }
        } else {
            spec.push_str(" -j ACCEPT");
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn base_match() -> Match {
        Match {
            index: 0,
            ip_proto_num: 6,
            dst_ip: "5.5.5.5".to_string(),
            netmask: "32".to_string(),
            dst_port: 80,
            new_dst_ip: String::new(),
            new_dst_port: 0,
        }
    }

    #[test]
    fn test_click_encoding() {
        assert_eq!(base_match().click_encoding(), "0,6-5.5.5.5/32-80");

        let mut m = base_match();
        m.index = 3;
        m.dst_port = 0;
        assert_eq!(m.click_encoding(), "3,6-5.5.5.5/32-0");
    }

    #[test]
    fn test_pass_through_rule() {
        let spec = base_match().nat_rule_spec().expect("spec");
        assert_eq!(spec, "-p 6 -d 5.5.5.5/32 -m tcp --dport 80 -j ACCEPT");
    }

    #[test]
    fn test_any_port_omits_port_match() {
        let mut m = base_match();
        m.dst_port = 0;
        let spec = m.nat_rule_spec().expect("spec");
        assert_eq!(spec, "-p 6 -d 5.5.5.5/32 -j ACCEPT");
    }

    #[test]
    fn test_port_match_extension_per_protocol() {
        for (proto, extension) in [(6, "tcp"), (17, "udp"), (132, "sctp")] {
            let mut m = base_match();
            m.ip_proto_num = proto;
            let spec = m.nat_rule_spec().expect("spec");
            assert!(
                spec.contains(&format!(" -m {extension} --dport 80")),
                "{spec}"
            );
        }
    }

    #[test]
    fn test_unsupported_protocol_with_port() {
        let mut m = base_match();
        m.ip_proto_num = 47;
        let err = m.nat_rule_spec().unwrap_err();
        assert!(matches!(err, AgentError::Conflict(_)), "got {err:?}");
    }

    #[test]
    fn test_rewrite_without_port() {
        let mut m = base_match();
        m.new_dst_ip = "192.168.0.9".to_string();
        let spec = m.nat_rule_spec().expect("spec");
        assert_eq!(
            spec,
            "-p 6 -d 5.5.5.5/32 -m tcp --dport 80 -j DNAT --to-destination 192.168.0.9"
        );
    }

    #[test]
    fn test_rewrite_with_port() {
        let mut m = base_match();
        m.new_dst_ip = "192.168.0.9".to_string();
        m.new_dst_port = 8080;
        let spec = m.nat_rule_spec().expect("spec");
        assert!(spec.ends_with("-j DNAT --to-destination 192.168.0.9:8080"), "{spec}");
    }

    #[test]
    fn test_wire_decoding() {
        let m: Match = serde_json::from_str(
            r#"{"index": 2, "ip_proto_num": 17, "dst_ip": "8.8.8.8", "netmask": "24",
                "dst_port": 53, "new_dst_ip": "1.1.1.1", "new_dst_port": 0}"#,
        )
        .expect("decode");
        assert_eq!(m.index, 2);
        assert_eq!(m.ip_proto_num, 17);
        assert!(m.is_rewrite());
    }

    #[test]
    fn test_wire_decoding_defaults() {
        // Rewrite fields may be omitted entirely for pass-through rules.
        let m: Match = serde_json::from_str(
            r#"{"index": 0, "ip_proto_num": 6, "dst_ip": "5.5.5.5", "netmask": "32"}"#,
        )
        .expect("decode");
        assert_eq!(m.dst_port, 0);
        assert!(!m.is_rewrite());
    }
}
