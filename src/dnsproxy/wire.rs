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

//! Binary encodings of resolution results.
//!
//! Lists are sequences of frames (a big-endian u32 length, then that many bytes) closed
//! by a zero-length frame. Strings are sent with their NUL terminator.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use bytes::{Buf, BufMut, BytesMut};

use super::resolver::{AddrInfo, HostEnt};
use crate::command::response::{self, DNS_PROXY_OPERATION_FAILED, DNS_PROXY_QUERY_RESULT};

/// Five big-endian i32s: flags, family, socktype, protocol, address length.
pub const ADDRINFO_HEADER_LEN: usize = 20;

const SOCKADDR_IN_LEN: usize = 16;
const SOCKADDR_IN6_LEN: usize = 28;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    Truncated,
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

pub fn put_frame(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32 + 1);
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn put_terminator(buf: &mut BytesMut) {
    buf.put_u32(0);
}

/// `401` carrying the resolver's error code in host byte order.
pub fn failure(code: u32) -> BytesMut {
    response::binary(DNS_PROXY_OPERATION_FAILED, &code.to_ne_bytes())
}

/// `222` followed by one record per result and a terminator.
pub fn addrinfo_response(results: &[AddrInfo]) -> BytesMut {
    let mut buf = response::code_only(DNS_PROXY_QUERY_RESULT);
    for ai in results {
        let sa = sockaddr_bytes(&ai.addr);
        let mut header = BytesMut::with_capacity(ADDRINFO_HEADER_LEN);
        header.put_i32(ai.flags);
        header.put_i32(ai.family);
        header.put_i32(ai.socktype);
        header.put_i32(ai.protocol);
        header.put_i32(sa.len() as i32);
        put_frame(&mut buf, &header);
        put_frame(&mut buf, &sa);
        match &ai.canonname {
            Some(name) => put_cstr(&mut buf, name),
            None => put_terminator(&mut buf),
        }
    }
    put_terminator(&mut buf);
    buf
}

/// `222` followed by the encoded host entry.
pub fn hostent_response(h: &HostEnt) -> BytesMut {
    let mut buf = response::code_only(DNS_PROXY_QUERY_RESULT);
    encode_hostent(&mut buf, h);
    buf
}

/// `222` as a binary message carrying only the canonical name.
pub fn hostname_response(name: Option<&str>) -> BytesMut {
    match name {
        Some(name) => {
            let mut data = Vec::with_capacity(name.len() + 1);
            data.extend_from_slice(name.as_bytes());
            data.push(0);
            response::binary(DNS_PROXY_QUERY_RESULT, &data)
        }
        None => response::binary(DNS_PROXY_QUERY_RESULT, &[]),
    }
}

pub fn encode_hostent(buf: &mut BytesMut, h: &HostEnt) {
    match &h.name {
        Some(name) => put_cstr(buf, name),
        None => put_terminator(buf),
    }
    for alias in &h.aliases {
        put_cstr(buf, alias);
    }
    put_terminator(buf);
    buf.put_i32(h.addrtype);
    buf.put_i32(h.length);
    for addr in &h.addrs {
        put_frame(buf, addr);
    }
    put_terminator(buf);
}

fn get_frame(buf: &mut impl Buf) -> Result<Vec<u8>, DecodeError> {
    if buf.remaining() < 4 {
        return Err(DecodeError::Truncated);
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(DecodeError::Truncated);
    }
    let mut out = vec![0; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn cstr(mut frame: Vec<u8>) -> Result<String, DecodeError> {
    if frame.pop() != Some(0) {
        return Err(DecodeError::Malformed("string is not NUL terminated"));
    }
    String::from_utf8(frame).map_err(|_| DecodeError::Malformed("string is not UTF-8"))
}

/// Inverse of [encode_hostent].
pub fn decode_hostent(buf: &mut impl Buf) -> Result<HostEnt, DecodeError> {
    let name = get_frame(buf)?;
    let name = if name.is_empty() { None } else { Some(cstr(name)?) };

    let mut aliases = Vec::new();
    loop {
        let alias = get_frame(buf)?;
        if alias.is_empty() {
            break;
        }
        aliases.push(cstr(alias)?);
    }

    if buf.remaining() < 8 {
        return Err(DecodeError::Truncated);
    }
    let addrtype = buf.get_i32();
    let length = buf.get_i32();

    let mut addrs = Vec::new();
    loop {
        let addr = get_frame(buf)?;
        if addr.is_empty() {
            break;
        }
        if addr.len() as i32 != length {
            return Err(DecodeError::Malformed("address length does not match h_length"));
        }
        addrs.push(addr);
    }

    Ok(HostEnt {
        name,
        aliases,
        addrtype,
        length,
        addrs,
    })
}

/// Decodes the records that follow a `222` getaddrinfo response code.
pub fn decode_addrinfo_list(buf: &mut impl Buf) -> Result<Vec<AddrInfo>, DecodeError> {
    let mut out = Vec::new();
    loop {
        let mut header = &get_frame(buf)?[..];
        if header.is_empty() {
            return Ok(out);
        }
        if header.len() != ADDRINFO_HEADER_LEN {
            return Err(DecodeError::Malformed("bad addrinfo header length"));
        }
        let flags = header.get_i32();
        let family = header.get_i32();
        let socktype = header.get_i32();
        let protocol = header.get_i32();
        let addrlen = header.get_i32();

        let sa = get_frame(buf)?;
        if sa.len() as i32 != addrlen {
            return Err(DecodeError::Malformed("sockaddr length does not match ai_addrlen"));
        }
        let addr = parse_sockaddr(&sa).ok_or(DecodeError::Malformed("unsupported sockaddr"))?;

        let canon = get_frame(buf)?;
        let canonname = if canon.is_empty() { None } else { Some(cstr(canon)?) };

        out.push(AddrInfo {
            flags,
            family,
            socktype,
            protocol,
            addr,
            canonname,
        });
    }
}

/// Linux `sockaddr_in` / `sockaddr_in6` layout: family in host order, port and flow
/// info in network order, scope id in host order.
pub fn sockaddr_bytes(addr: &SocketAddr) -> Vec<u8> {
    match addr {
        SocketAddr::V4(a) => {
            let mut b = Vec::with_capacity(SOCKADDR_IN_LEN);
            b.extend_from_slice(&(libc::AF_INET as u16).to_ne_bytes());
            b.extend_from_slice(&a.port().to_be_bytes());
            b.extend_from_slice(&a.ip().octets());
            b.extend_from_slice(&[0; 8]);
            b
        }
        SocketAddr::V6(a) => {
            let mut b = Vec::with_capacity(SOCKADDR_IN6_LEN);
            b.extend_from_slice(&(libc::AF_INET6 as u16).to_ne_bytes());
            b.extend_from_slice(&a.port().to_be_bytes());
            b.extend_from_slice(&a.flowinfo().to_be_bytes());
            b.extend_from_slice(&a.ip().octets());
            b.extend_from_slice(&a.scope_id().to_ne_bytes());
            b
        }
    }
}

pub fn parse_sockaddr(b: &[u8]) -> Option<SocketAddr> {
    if b.len() < 2 {
        return None;
    }
    let family = u16::from_ne_bytes([b[0], b[1]]) as i32;
    match (family, b.len()) {
        (libc::AF_INET, SOCKADDR_IN_LEN) => {
            let port = u16::from_be_bytes([b[2], b[3]]);
            let ip = Ipv4Addr::new(b[4], b[5], b[6], b[7]);
            Some(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        (libc::AF_INET6, SOCKADDR_IN6_LEN) => {
            let port = u16::from_be_bytes([b[2], b[3]]);
            let flowinfo = u32::from_be_bytes(b[4..8].try_into().ok()?);
            let octets: [u8; 16] = b[8..24].try_into().ok()?;
            let scope_id = u32::from_ne_bytes(b[24..28].try_into().ok()?);
            Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(octets),
                port,
                flowinfo,
                scope_id,
            )))
        }
        _ => None,
    }
}

/// Raw address bytes of `ip`, as stored in a host entry.
pub fn ip_bytes(ip: &IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hostent() -> HostEnt {
        HostEnt {
            name: Some("www.example.com".to_string()),
            aliases: vec!["example.com".to_string(), "web.example.com".to_string()],
            addrtype: libc::AF_INET,
            length: 4,
            addrs: vec![vec![93, 184, 216, 34], vec![0, 0, 0, 0]],
        }
    }

    #[test]
    fn hostent_roundtrip() {
        for h in [
            sample_hostent(),
            HostEnt {
                name: None,
                aliases: vec![],
                addrtype: libc::AF_INET6,
                length: 16,
                addrs: vec![Ipv6Addr::LOCALHOST.octets().to_vec()],
            },
            HostEnt {
                addrs: vec![],
                ..sample_hostent()
            },
        ] {
            let mut buf = BytesMut::new();
            encode_hostent(&mut buf, &h);
            let mut frozen = buf.freeze();
            assert_eq!(decode_hostent(&mut frozen).unwrap(), h);
            assert!(!frozen.has_remaining(), "decoder consumed everything");
        }
    }

    #[test]
    fn hostent_layout() {
        let h = HostEnt {
            name: Some("a".to_string()),
            aliases: vec![],
            addrtype: libc::AF_INET,
            length: 4,
            addrs: vec![vec![10, 0, 0, 1]],
        };
        let mut buf = BytesMut::new();
        encode_hostent(&mut buf, &h);
        let mut want = Vec::new();
        want.extend_from_slice(&[0, 0, 0, 2, b'a', 0]);
        want.extend_from_slice(&[0, 0, 0, 0]);
        want.extend_from_slice(&(libc::AF_INET as u32).to_be_bytes());
        want.extend_from_slice(&[0, 0, 0, 4]);
        want.extend_from_slice(&[0, 0, 0, 4, 10, 0, 0, 1]);
        want.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(&buf[..], want.as_slice());
    }

    #[test]
    fn truncated_hostent() {
        let mut buf = BytesMut::new();
        encode_hostent(&mut buf, &sample_hostent());
        let cut = buf.split_to(buf.len() - 3).freeze();
        assert_eq!(decode_hostent(&mut cut.clone()), Err(DecodeError::Truncated));
    }

    #[test]
    fn addrinfo_roundtrip() {
        let results = vec![
            AddrInfo {
                flags: 0,
                family: libc::AF_INET,
                socktype: libc::SOCK_STREAM,
                protocol: libc::IPPROTO_TCP,
                addr: "93.184.216.34:80".parse().unwrap(),
                canonname: Some("www.example.com".to_string()),
            },
            AddrInfo {
                flags: 0,
                family: libc::AF_INET6,
                socktype: libc::SOCK_DGRAM,
                protocol: libc::IPPROTO_UDP,
                addr: "[2606:2800:220:1::1%3]:53".parse().unwrap(),
                canonname: None,
            },
        ];
        let mut resp = addrinfo_response(&results).freeze();
        assert_eq!(&resp[..4], b"222\0");
        resp.advance(4);
        assert_eq!(decode_addrinfo_list(&mut resp).unwrap(), results);
        assert!(!resp.has_remaining());
    }

    #[test]
    fn empty_addrinfo_is_just_terminator() {
        assert_eq!(&addrinfo_response(&[])[..], b"222\0\0\0\0\0");
    }

    #[test]
    fn sockaddr_sizes() {
        assert_eq!(sockaddr_bytes(&"1.2.3.4:5".parse().unwrap()).len(), SOCKADDR_IN_LEN);
        assert_eq!(sockaddr_bytes(&"[::1]:5".parse().unwrap()).len(), SOCKADDR_IN6_LEN);
        assert_eq!(parse_sockaddr(&[0; 3]), None);
    }

    #[test]
    fn hostname_and_failure() {
        assert_eq!(&hostname_response(Some("a.b"))[..], b"222\0\0\0\0\x04a.b\0");
        assert_eq!(&hostname_response(None)[..], b"222\0\0\0\0\0");
        let f = failure(7);
        assert_eq!(&f[..8], b"401\0\0\0\0\x04");
        assert_eq!(&f[8..], &7u32.to_ne_bytes());
    }
}
