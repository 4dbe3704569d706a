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

use std::ffi::{CStr, CString};
use std::net::SocketAddr;

use tracing::{debug, trace};

use super::resolver::{
    AddrInfo, HOST_NOT_FOUND, HostEnt, Hints, NO_DATA, NO_RECOVERY, ResolveError, Resolver,
    TRY_AGAIN,
};
use super::wire;

/// Resolves through the host's libc.
///
/// The interface is only recorded in logs; the host resolver has no per-interface
/// scoping.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl SystemResolver {
    pub fn new() -> Self {
        SystemResolver
    }
}

fn cstring(s: Option<&str>) -> Result<Option<CString>, ResolveError> {
    s.map(CString::new)
        .transpose()
        .map_err(|_| ResolveError::AddrInfo(libc::EAI_NONAME))
}

/// Maps a getaddrinfo failure onto the h_errno the host lookup calls report.
fn h_errno_for(eai: i32) -> i32 {
    match eai {
        libc::EAI_NONAME => HOST_NOT_FOUND,
        libc::EAI_AGAIN => TRY_AGAIN,
        _ => NO_RECOVERY,
    }
}

fn address_len(family: i32) -> Option<usize> {
    match family {
        libc::AF_INET => Some(4),
        libc::AF_INET6 => Some(16),
        _ => None,
    }
}

impl Resolver for SystemResolver {
    fn getaddrinfo(
        &self,
        host: Option<&str>,
        service: Option<&str>,
        hints: Option<&Hints>,
        iface: Option<&str>,
    ) -> Result<Vec<AddrInfo>, ResolveError> {
        trace!(component = "dnsproxy", ?host, ?service, ?hints, ?iface, "getaddrinfo");
        let host = cstring(host)?;
        let service = cstring(service)?;
        sys::getaddrinfo(host.as_deref(), service.as_deref(), hints)
    }

    fn gethostbyname(
        &self,
        name: Option<&str>,
        family: i32,
        iface: Option<&str>,
    ) -> Result<HostEnt, ResolveError> {
        trace!(component = "dnsproxy", ?name, family, ?iface, "gethostbyname");
        let Some(name) = name else {
            return Err(ResolveError::Host(HOST_NOT_FOUND));
        };
        let Some(length) = address_len(family) else {
            return Err(ResolveError::Host(NO_RECOVERY));
        };
        let host = cstring(Some(name)).map_err(|_| ResolveError::Host(HOST_NOT_FOUND))?;
        let hints = Hints {
            flags: libc::AI_CANONNAME,
            family,
            socktype: libc::SOCK_STREAM,
            protocol: 0,
        };
        let results = sys::getaddrinfo(host.as_deref(), None, Some(&hints))
            .map_err(|e| ResolveError::Host(h_errno_for(e.code() as i32)))?;

        let canonical = results.iter().find_map(|ai| ai.canonname.clone());
        let mut addrs: Vec<Vec<u8>> = Vec::new();
        for ai in &results {
            let bytes = wire::ip_bytes(&ai.addr.ip());
            if bytes.len() == length && !addrs.contains(&bytes) {
                addrs.push(bytes);
            }
        }
        if addrs.is_empty() {
            return Err(ResolveError::Host(NO_DATA));
        }
        Ok(HostEnt {
            name: Some(canonical.unwrap_or_else(|| name.to_string())),
            aliases: Vec::new(),
            addrtype: family,
            length: length as i32,
            addrs,
        })
    }

    fn gethostbyaddr(
        &self,
        addr: &[u8],
        family: i32,
        iface: Option<&str>,
    ) -> Result<HostEnt, ResolveError> {
        trace!(component = "dnsproxy", ?addr, family, ?iface, "gethostbyaddr");
        if address_len(family) != Some(addr.len()) {
            debug!(component = "dnsproxy", family, len = addr.len(), "address length mismatch");
            return Err(ResolveError::Host(NO_RECOVERY));
        }
        let name = sys::getnameinfo(family, addr).map_err(|e| {
            ResolveError::Host(match e {
                libc::EAI_NONAME => HOST_NOT_FOUND,
                libc::EAI_AGAIN => TRY_AGAIN,
                _ => NO_RECOVERY,
            })
        })?;
        Ok(HostEnt {
            name: Some(name),
            aliases: Vec::new(),
            addrtype: family,
            length: addr.len() as i32,
            addrs: vec![addr.to_vec()],
        })
    }
}

#[allow(unsafe_code)]
mod sys {
    use super::*;

    const NI_MAXHOST: usize = 1025;

    pub fn getaddrinfo(
        host: Option<&CStr>,
        service: Option<&CStr>,
        hints: Option<&Hints>,
    ) -> Result<Vec<AddrInfo>, ResolveError> {
        // SAFETY: addrinfo is plain data; all-zero is the documented empty hints value.
        let mut raw_hints: libc::addrinfo = unsafe { std::mem::zeroed() };
        if let Some(h) = hints {
            raw_hints.ai_flags = h.flags;
            raw_hints.ai_family = h.family;
            raw_hints.ai_socktype = h.socktype;
            raw_hints.ai_protocol = h.protocol;
        }
        let mut res: *mut libc::addrinfo = std::ptr::null_mut();
        // SAFETY: every pointer is either null or valid for the duration of the call.
        let rc = unsafe {
            libc::getaddrinfo(
                host.map_or(std::ptr::null(), CStr::as_ptr),
                service.map_or(std::ptr::null(), CStr::as_ptr),
                if hints.is_some() {
                    &raw_hints as *const libc::addrinfo
                } else {
                    std::ptr::null()
                },
                &mut res,
            )
        };
        if rc != 0 {
            return Err(ResolveError::AddrInfo(rc));
        }

        let mut out = Vec::new();
        let mut cur = res;
        while !cur.is_null() {
            // SAFETY: cur walks the list getaddrinfo returned, which stays valid until
            // freeaddrinfo below.
            let ai = unsafe { &*cur };
            if let Some(addr) = socket_addr(ai) {
                let canonname = (!ai.ai_canonname.is_null()).then(|| {
                    // SAFETY: non-null ai_canonname is a NUL terminated string.
                    unsafe { CStr::from_ptr(ai.ai_canonname) }
                        .to_string_lossy()
                        .into_owned()
                });
                out.push(AddrInfo {
                    flags: ai.ai_flags,
                    family: ai.ai_family,
                    socktype: ai.ai_socktype,
                    protocol: ai.ai_protocol,
                    addr,
                    canonname,
                });
            }
            cur = ai.ai_next;
        }
        // SAFETY: res came from a successful getaddrinfo and is freed once.
        unsafe { libc::freeaddrinfo(res) };
        Ok(out)
    }

    fn socket_addr(ai: &libc::addrinfo) -> Option<SocketAddr> {
        if ai.ai_addr.is_null() {
            return None;
        }
        // SAFETY: ai_addr points at ai_addrlen bytes owned by the addrinfo list.
        let bytes = unsafe {
            std::slice::from_raw_parts(ai.ai_addr as *const u8, ai.ai_addrlen as usize)
        };
        wire::parse_sockaddr(bytes)
    }

    /// Reverse lookup of a raw address. Errors are `EAI_*` codes.
    pub fn getnameinfo(family: i32, addr: &[u8]) -> Result<String, i32> {
        // SAFETY: sockaddr_storage is plain data and large enough for either family.
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let len = match family {
            libc::AF_INET => {
                let sin = &mut storage as *mut _ as *mut libc::sockaddr_in;
                // SAFETY: storage is aligned and sized for sockaddr_in.
                unsafe {
                    (*sin).sin_family = libc::AF_INET as libc::sa_family_t;
                    std::ptr::copy_nonoverlapping(
                        addr.as_ptr(),
                        &mut (*sin).sin_addr as *mut _ as *mut u8,
                        4,
                    );
                }
                std::mem::size_of::<libc::sockaddr_in>()
            }
            _ => {
                let sin6 = &mut storage as *mut _ as *mut libc::sockaddr_in6;
                // SAFETY: storage is aligned and sized for sockaddr_in6.
                unsafe {
                    (*sin6).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                    std::ptr::copy_nonoverlapping(
                        addr.as_ptr(),
                        &mut (*sin6).sin6_addr as *mut _ as *mut u8,
                        16,
                    );
                }
                std::mem::size_of::<libc::sockaddr_in6>()
            }
        };

        let mut host = [0 as libc::c_char; NI_MAXHOST];
        // SAFETY: storage holds a valid sockaddr of len bytes; host is writable.
        let rc = unsafe {
            libc::getnameinfo(
                &storage as *const _ as *const libc::sockaddr,
                len as libc::socklen_t,
                host.as_mut_ptr(),
                host.len() as libc::socklen_t,
                std::ptr::null_mut(),
                0,
                libc::NI_NAMEREQD,
            )
        };
        if rc != 0 {
            return Err(rc);
        }
        // SAFETY: getnameinfo NUL terminates host on success.
        Ok(unsafe { CStr::from_ptr(host.as_ptr()) }
            .to_string_lossy()
            .into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_getaddrinfo() {
        let hints = Hints {
            flags: libc::AI_NUMERICHOST | libc::AI_NUMERICSERV,
            family: libc::AF_INET,
            socktype: libc::SOCK_STREAM,
            protocol: 0,
        };
        let res = SystemResolver::new()
            .getaddrinfo(Some("127.0.0.1"), Some("80"), Some(&hints), None)
            .unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].addr, "127.0.0.1:80".parse().unwrap());
        assert_eq!(res[0].family, libc::AF_INET);
    }

    #[test]
    fn numeric_host_rejects_names() {
        let hints = Hints {
            flags: libc::AI_NUMERICHOST,
            ..Default::default()
        };
        let err = SystemResolver::new()
            .getaddrinfo(Some("not-an-address"), None, Some(&hints), None)
            .unwrap_err();
        assert!(matches!(err, ResolveError::AddrInfo(c) if c != 0));
    }

    #[test]
    fn hostbyname_of_literal() {
        let h = SystemResolver::new()
            .gethostbyname(Some("127.0.0.1"), libc::AF_INET, Some("lo"))
            .unwrap();
        assert_eq!(h.addrtype, libc::AF_INET);
        assert_eq!(h.length, 4);
        assert_eq!(h.addrs, vec![vec![127, 0, 0, 1]]);
    }

    #[test]
    fn hostbyaddr_length_mismatch() {
        let err = SystemResolver::new()
            .gethostbyaddr(&[127, 0, 0, 1], libc::AF_INET6, None)
            .unwrap_err();
        assert_eq!(err, ResolveError::Host(NO_RECOVERY));
    }
}
