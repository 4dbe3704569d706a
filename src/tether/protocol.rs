// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Update frames pushed to the DNS forwarding daemon over its stdin.
//!
//! The daemon reads NUL terminated, `|` separated lines of bounded size. Fields that
//! would push a frame past [MAX_CMD_SIZE] are dropped, along with every field after them.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

use tracing::debug;

/// Upper bound for a single frame, trailing NUL included.
pub const MAX_CMD_SIZE: usize = 1024;

const SEPARATOR: char = '|';
const UPDATE_DNS: &str = "update_dns";
const UPDATE_IFACES: &str = "update_ifaces";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Permission {
    #[default]
    None,
    Network,
    System,
}

impl Permission {
    fn bits(self) -> u32 {
        match self {
            Permission::None => 0x0,
            Permission::Network => 0x1,
            Permission::System => 0x3,
        }
    }
}

/// Routing mark attached to sockets the daemon opens towards upstream servers.
///
/// Layout (low to high): 16 bits of network id, explicit selection, VPN protection,
/// then two bits of permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fwmark {
    pub net_id: u32,
    pub explicitly_selected: bool,
    pub protected_from_vpn: bool,
    pub permission: Permission,
}

impl Fwmark {
    /// The mark used for DNS forwarding: explicitly selected, VPN protected, system permission.
    pub fn for_dns_forwarding(net_id: u32) -> Self {
        Fwmark {
            net_id,
            explicitly_selected: true,
            protected_from_vpn: true,
            permission: Permission::System,
        }
    }

    pub fn value(&self) -> u32 {
        (self.net_id & 0xffff)
            | (self.explicitly_selected as u32) << 16
            | (self.protected_from_vpn as u32) << 17
            | self.permission.bits() << 18
    }
}

impl fmt::LowerHex for Fwmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.value(), f)
    }
}

/// A single bounded update command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(String);

impl Frame {
    fn new(head: String) -> Self {
        Frame(head)
    }

    /// Appends a field if it still fits, returning false otherwise.
    fn push(&mut self, field: &str) -> bool {
        let len = self.0.len() + SEPARATOR.len_utf8() + field.len();
        // leave room for the NUL terminator
        if len + 1 >= MAX_CMD_SIZE {
            return false;
        }
        self.0.push(SEPARATOR);
        self.0.push_str(field);
        true
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes written to the daemon, including the terminating NUL.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.len() + 1);
        out.extend_from_slice(self.0.as_bytes());
        out.push(0);
        out
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An upstream server that is not a numeric address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to parse DNS server '{0}'")]
pub struct InvalidServer(pub String);

/// Result of encoding an `update_dns` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsUpdate {
    pub frame: Frame,
    /// Servers that made it into the frame, in order.
    pub servers: Vec<String>,
}

/// Builds `update_dns|0x<mark>|<server>...`.
///
/// Each server is validated before its size is checked; once one does not fit the rest
/// are dropped without being looked at.
pub fn update_dns(mark: Fwmark, servers: &[String]) -> Result<DnsUpdate, InvalidServer> {
    let mut frame = Frame::new(format!("{UPDATE_DNS}{SEPARATOR}0x{mark:x}"));
    let mut accepted = Vec::with_capacity(servers.len());
    for (i, server) in servers.iter().enumerate() {
        debug!("set dns forwarder (0x{mark:x} {i} = '{server}')");
        if !is_numeric_host(server) {
            return Err(InvalidServer(server.clone()));
        }
        if !frame.push(server) {
            debug!("too many DNS servers listed");
            break;
        }
        accepted.push(server.clone());
    }
    Ok(DnsUpdate {
        frame,
        servers: accepted,
    })
}

/// Builds `update_ifaces|<iface>...`, or None if no interface fits (or there are none).
pub fn update_ifaces<S: AsRef<str>>(ifaces: &[S]) -> Option<Frame> {
    let mut frame = Frame::new(UPDATE_IFACES.to_string());
    let mut any = false;
    for iface in ifaces {
        if !frame.push(iface.as_ref()) {
            debug!("too many DNS ifaces listed");
            break;
        }
        any = true;
    }
    any.then_some(frame)
}

/// Accepts literal IPv4/IPv6 addresses, including IPv6 with a `%scope` suffix.
fn is_numeric_host(s: &str) -> bool {
    if s.parse::<IpAddr>().is_ok() {
        return true;
    }
    match s.split_once('%') {
        Some((addr, scope)) => !scope.is_empty() && addr.parse::<Ipv6Addr>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test_case(0, 0xf0000; "zero net")]
    #[test_case(100, 0xf0064; "net 100")]
    #[test_case(0x1_0005, 0xf0005; "net id is 16 bits")]
    fn dns_mark(net_id: u32, want: u32) {
        assert_eq!(Fwmark::for_dns_forwarding(net_id).value(), want);
    }

    #[test]
    fn mark_bits() {
        let m = Fwmark {
            net_id: 7,
            explicitly_selected: false,
            protected_from_vpn: true,
            permission: Permission::Network,
        };
        assert_eq!(m.value(), 7 | 1 << 17 | 1 << 18);
    }

    #[test]
    fn dns_frame() {
        let update = update_dns(
            Fwmark::for_dns_forwarding(100),
            &strings(&["8.8.8.8", "2001:4860:4860::8888"]),
        )
        .unwrap();
        assert_eq!(
            update.frame.as_str(),
            "update_dns|0xf0064|8.8.8.8|2001:4860:4860::8888"
        );
        assert_eq!(update.servers, strings(&["8.8.8.8", "2001:4860:4860::8888"]));
        let wire = update.frame.to_wire();
        assert_eq!(wire.last(), Some(&0));
        assert_eq!(wire.len(), update.frame.as_str().len() + 1);
    }

    #[test_case("10.0.0.1", true; "ipv4")]
    #[test_case("fe80::1%wlan0", true; "scoped ipv6")]
    #[test_case("fe80::1%", false; "empty scope")]
    #[test_case("not-an-ip", false; "garbage")]
    #[test_case("example.com", false; "hostname")]
    #[test_case("", false; "empty")]
    fn numeric_host(s: &str, ok: bool) {
        assert_eq!(is_numeric_host(s), ok);
    }

    #[test]
    fn dns_rejects_hostnames() {
        let err = update_dns(
            Fwmark::for_dns_forwarding(1),
            &strings(&["10.0.0.1", "not-an-ip"]),
        )
        .unwrap_err();
        assert_eq!(err, InvalidServer("not-an-ip".to_string()));
    }

    #[test]
    fn dns_truncates_at_frame_limit() {
        let servers: Vec<String> = (0..200).map(|i| format!("10.0.{}.{}", i / 250, i % 250)).collect();
        let update = update_dns(Fwmark::for_dns_forwarding(1), &servers).unwrap();
        assert!(update.servers.len() < servers.len());
        assert_eq!(&servers[..update.servers.len()], update.servers.as_slice());
        assert!(update.frame.to_wire().len() < MAX_CMD_SIZE);

        // One more server would not have fit.
        let next = &servers[update.servers.len()];
        assert!(update.frame.as_str().len() + 1 + next.len() + 1 >= MAX_CMD_SIZE);
    }

    #[test]
    fn dns_does_not_validate_dropped_servers() {
        let mut servers: Vec<String> = (0..200).map(|i| format!("10.0.{}.{}", i / 250, i % 250)).collect();
        servers.push("not-an-ip".to_string());
        assert!(update_dns(Fwmark::for_dns_forwarding(1), &servers).is_ok());
    }

    #[test]
    fn ifaces_frame() {
        assert_eq!(
            update_ifaces(&["wlan0", "rndis0"]).unwrap().as_str(),
            "update_ifaces|wlan0|rndis0"
        );
        assert_eq!(update_ifaces::<&str>(&[]), None);
    }

    #[test]
    fn ifaces_truncates_at_frame_limit() {
        let ifaces: Vec<String> = (0..300).map(|i| format!("eth{i}")).collect();
        let frame = update_ifaces(&ifaces).unwrap();
        assert!(frame.to_wire().len() < MAX_CMD_SIZE);
        let included = frame.as_str().split('|').count() - 1;
        assert!(included < ifaces.len());
        assert!(frame.as_str().ends_with(&format!("|{}", ifaces[included - 1])));
    }

    #[test]
    fn oversized_single_iface_is_dropped() {
        let huge = "x".repeat(MAX_CMD_SIZE);
        assert_eq!(update_ifaces(&[huge.as_str()]), None);
    }
}
