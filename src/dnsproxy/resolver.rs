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

use std::net::SocketAddr;

// h_errno values, as reported by the host lookup calls.
pub const HOST_NOT_FOUND: i32 = 1;
pub const TRY_AGAIN: i32 = 2;
pub const NO_RECOVERY: i32 = 3;
pub const NO_DATA: i32 = 4;

/// Caller supplied getaddrinfo hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hints {
    pub flags: i32,
    pub family: i32,
    pub socktype: i32,
    pub protocol: i32,
}

/// One getaddrinfo result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub flags: i32,
    pub family: i32,
    pub socktype: i32,
    pub protocol: i32,
    pub addr: SocketAddr,
    pub canonname: Option<String>,
}

/// A host entry as returned by the host lookup calls.
///
/// Every entry of `addrs` is exactly `length` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostEnt {
    pub name: Option<String>,
    pub aliases: Vec<String>,
    pub addrtype: i32,
    pub length: i32,
    pub addrs: Vec<Vec<u8>>,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// A getaddrinfo `EAI_*` code.
    #[error("getaddrinfo failed with {0}")]
    AddrInfo(i32),
    /// An `h_errno` value.
    #[error("host lookup failed with h_errno {0}")]
    Host(i32),
}

impl ResolveError {
    /// The code sent back to clients; passed through without interpretation.
    pub fn code(&self) -> u32 {
        match self {
            ResolveError::AddrInfo(c) | ResolveError::Host(c) => *c as u32,
        }
    }
}

/// Name resolution scoped to a network interface.
///
/// Calls block; the proxy only invokes them from the blocking pool. `iface` of None
/// means the default network.
pub trait Resolver: Send + Sync {
    fn getaddrinfo(
        &self,
        host: Option<&str>,
        service: Option<&str>,
        hints: Option<&Hints>,
        iface: Option<&str>,
    ) -> Result<Vec<AddrInfo>, ResolveError>;

    fn gethostbyname(
        &self,
        name: Option<&str>,
        family: i32,
        iface: Option<&str>,
    ) -> Result<HostEnt, ResolveError>;

    fn gethostbyaddr(
        &self,
        addr: &[u8],
        family: i32,
        iface: Option<&str>,
    ) -> Result<HostEnt, ResolveError>;
}
