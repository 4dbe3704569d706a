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

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use nix::errno::Errno;
use tracing::{debug, warn};

use super::resolver::NO_RECOVERY;
use super::{WorkerContext, atoi, optional, reject_arity, wire};
use crate::command::response::OPERATION_FAILED;
use crate::command::{Command, SocketClient};

/// `gethostbyaddr <addr> <addrlen> <family> <pid> <iface>`
pub struct GetHostByAddrCmd {
    ctx: WorkerContext,
}

impl GetHostByAddrCmd {
    pub fn new(ctx: WorkerContext) -> Self {
        GetHostByAddrCmd { ctx }
    }
}

/// Binary form of `text` for `family`, zero padded to the size of an IPv6 address.
fn parse_address(family: i32, text: &str) -> Result<[u8; 16], Option<Errno>> {
    let mut out = [0u8; 16];
    match family {
        libc::AF_INET => {
            let ip: Ipv4Addr = text.parse().map_err(|_| None)?;
            out[..4].copy_from_slice(&ip.octets());
        }
        libc::AF_INET6 => {
            let ip: Ipv6Addr = text.parse().map_err(|_| None)?;
            out.copy_from_slice(&ip.octets());
        }
        _ => return Err(Some(Errno::EAFNOSUPPORT)),
    }
    Ok(out)
}

#[async_trait]
impl Command for GetHostByAddrCmd {
    fn name(&self) -> &'static str {
        "gethostbyaddr"
    }

    async fn run(&self, client: &Arc<SocketClient>, argv: &[String]) -> io::Result<()> {
        if argv.len() != 6 {
            return reject_arity(client, self.name(), argv.len()).await;
        }
        let text = &argv[1];
        let addr_len = atoi(&argv[2]);
        let family = atoi(&argv[3]);
        let pid = atoi(&argv[4]);
        let iface = optional(&argv[5]);

        let addr = match parse_address(family, text) {
            Ok(addr) => addr,
            Err(errno) => {
                warn!(component = "dnsproxy", addr = %text, family, "unparsable address");
                return client
                    .send_msg(
                        OPERATION_FAILED,
                        &format!("inet_pton(\"{text}\") failed"),
                        errno,
                    )
                    .await;
            }
        };
        debug!(component = "dnsproxy", addr = %text, addr_len, family, ?iface, pid, "gethostbyaddr");

        // the caller's length is passed through; the resolver checks it against the family
        let len = addr_len.clamp(0, addr.len() as i32) as usize;
        self.ctx
            .spawn(
                "gethostbyaddr",
                client,
                NO_RECOVERY as u32,
                move |ctx: &WorkerContext| {
                    let iface = ctx.effective_iface(iface, pid);
                    match ctx.resolver.gethostbyaddr(&addr[..len], family, iface.as_deref()) {
                        Ok(h) => wire::hostname_response(h.name.as_deref()),
                        Err(e) => {
                            debug!(component = "dnsproxy", "gethostbyaddr failed: {e}");
                            wire::failure(e.code())
                        }
                    }
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnsproxy::resolver::HostEnt;
    use crate::test_helpers::dns::{FakeResolver, LookupCall, start_proxy};

    #[test]
    fn address_parsing() {
        assert_eq!(parse_address(libc::AF_INET, "10.0.0.1").unwrap()[..4], [10, 0, 0, 1]);
        assert_eq!(
            parse_address(libc::AF_INET6, "::1").unwrap(),
            Ipv6Addr::LOCALHOST.octets()
        );
        assert_eq!(parse_address(libc::AF_INET, "::1"), Err(None));
        assert_eq!(
            parse_address(libc::AF_UNIX, "10.0.0.1"),
            Err(Some(Errno::EAFNOSUPPORT))
        );
    }

    #[tokio::test]
    async fn unparsable_address_fails_synchronously() {
        let resolver = FakeResolver::new();
        let proxy = start_proxy(resolver.clone()).await;
        let mut conn = proxy.connect().await;

        conn.send("gethostbyaddr 10.0.0.999 4 2 0 ^").await;
        assert_eq!(
            conn.read_text().await,
            "400 inet_pton(\"10.0.0.999\") failed"
        );
        assert!(resolver.calls().is_empty());

        conn.send("gethostbyaddr 10.0.0.9 4 1 0 ^").await;
        assert_eq!(
            conn.read_text().await,
            "400 inet_pton(\"10.0.0.9\") failed (Address family not supported by protocol)"
        );
        assert!(resolver.calls().is_empty());

        conn.send("gethostbyaddr 10.0.0.9 4 2 0").await;
        assert_eq!(
            conn.read_text().await,
            "501 Invalid number of arguments to gethostbyaddr: 5"
        );
        assert!(resolver.calls().is_empty());
    }

    #[tokio::test]
    async fn replies_with_name_only() {
        let resolver = FakeResolver::new();
        resolver.set_hostent(Ok(HostEnt {
            name: Some("dns.google".to_string()),
            aliases: vec!["ignored".to_string()],
            addrtype: libc::AF_INET,
            length: 4,
            addrs: vec![vec![8, 8, 8, 8]],
        }));
        let proxy = start_proxy(resolver.clone()).await;
        let mut conn = proxy.connect().await;

        conn.send("gethostbyaddr 8.8.8.8 4 2 0 wlan0").await;
        assert_eq!(conn.read_binary().await, (222, b"dns.google\0".to_vec()));
        assert_eq!(
            resolver.calls(),
            vec![LookupCall::HostByAddr {
                addr: vec![8, 8, 8, 8],
                family: libc::AF_INET,
                iface: Some("wlan0".to_string()),
            }]
        );
    }
}
