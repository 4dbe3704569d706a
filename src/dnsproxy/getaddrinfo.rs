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
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::resolver::Hints;
use super::{WorkerContext, atoi, optional, reject_arity, wire};
use crate::command::{Command, SocketClient};

/// `getaddrinfo <host> <service> <flags> <family> <socktype> <protocol> <iface> <pid>`
pub struct GetAddrInfoCmd {
    ctx: WorkerContext,
}

impl GetAddrInfoCmd {
    pub fn new(ctx: WorkerContext) -> Self {
        GetAddrInfoCmd { ctx }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Request {
    host: Option<String>,
    service: Option<String>,
    hints: Option<Hints>,
    iface: Option<String>,
    pid: i32,
}

impl Request {
    fn parse(argv: &[String]) -> Request {
        let flags = atoi(&argv[3]);
        let family = atoi(&argv[4]);
        let socktype = atoi(&argv[5]);
        let protocol = atoi(&argv[6]);
        let unset = [flags, family, socktype, protocol].iter().all(|v| *v == -1);
        Request {
            host: optional(&argv[1]),
            service: optional(&argv[2]),
            hints: (!unset).then_some(Hints {
                flags,
                family,
                socktype,
                protocol,
            }),
            iface: optional(&argv[7]),
            pid: atoi(&argv[8]),
        }
    }
}

#[async_trait]
impl Command for GetAddrInfoCmd {
    fn name(&self) -> &'static str {
        "getaddrinfo"
    }

    async fn run(&self, client: &Arc<SocketClient>, argv: &[String]) -> io::Result<()> {
        if argv.len() != 9 {
            return reject_arity(client, self.name(), argv.len()).await;
        }
        let Request {
            host,
            service,
            hints,
            iface,
            pid,
        } = Request::parse(argv);
        debug!(component = "dnsproxy", ?host, ?service, ?hints, ?iface, pid, "getaddrinfo");
        self.ctx
            .spawn(
                "getaddrinfo",
                client,
                libc::EAI_FAIL as u32,
                move |ctx: &WorkerContext| {
                    let iface = ctx.effective_iface(iface, pid);
                    match ctx.resolver.getaddrinfo(
                        host.as_deref(),
                        service.as_deref(),
                        hints.as_ref(),
                        iface.as_deref(),
                    ) {
                        Ok(results) => wire::addrinfo_response(&results),
                        Err(e) => {
                            debug!(component = "dnsproxy", "getaddrinfo failed: {e}");
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
    use crate::dnsproxy::resolver::{AddrInfo, ResolveError};
    use crate::test_helpers::dns::{FakeResolver, LookupCall, start_proxy};

    fn argv(line: &str) -> Vec<String> {
        line.split(' ').map(str::to_string).collect()
    }

    #[test]
    fn hints_unset_only_when_all_minus_one() {
        let r = Request::parse(&argv("getaddrinfo example.com ^ -1 -1 -1 -1 ^ 42"));
        assert_eq!(r.hints, None);
        assert_eq!(r.host.as_deref(), Some("example.com"));
        assert_eq!(r.service, None);
        assert_eq!(r.iface, None);
        assert_eq!(r.pid, 42);

        let r = Request::parse(&argv("getaddrinfo ^ http -1 2 -1 -1 wlan0 0"));
        assert_eq!(
            r.hints,
            Some(Hints {
                flags: -1,
                family: 2,
                socktype: -1,
                protocol: -1
            })
        );
        assert_eq!(r.iface.as_deref(), Some("wlan0"));
    }

    #[tokio::test]
    async fn wrong_arity_spawns_no_worker() {
        let resolver = FakeResolver::new();
        let proxy = start_proxy(resolver.clone()).await;
        let mut conn = proxy.connect().await;

        conn.send("getaddrinfo example.com ^ -1 -1 -1 -1 ^").await;
        assert_eq!(
            conn.read_text().await,
            "501 Invalid number of arguments to getaddrinfo: 8"
        );
        assert!(resolver.calls().is_empty());

        // the connection keeps serving after a rejection
        conn.send("getaddrinfo example.com ^ -1 -1 -1 -1 ^ 1").await;
        assert_eq!(conn.read_code().await, 222);
        assert!(conn.read_addrinfo_list().await.is_empty());
        assert_eq!(resolver.calls().len(), 1);
    }

    #[tokio::test]
    async fn results_are_framed() {
        let resolver = FakeResolver::new();
        let results = vec![AddrInfo {
            flags: 0,
            family: libc::AF_INET,
            socktype: libc::SOCK_STREAM,
            protocol: libc::IPPROTO_TCP,
            addr: "10.1.2.3:443".parse().unwrap(),
            canonname: Some("example.com".to_string()),
        }];
        resolver.set_addrinfo(Ok(results.clone()));
        let proxy = start_proxy(resolver.clone()).await;
        proxy.lookup.set_iface_for_pid("rmnet0", 77);

        let mut conn = proxy.connect().await;
        conn.send("getaddrinfo example.com https 0 2 1 6 ^ 77").await;
        assert_eq!(conn.read_code().await, 222);
        assert_eq!(conn.read_addrinfo_list().await, results);

        assert_eq!(
            resolver.calls(),
            vec![LookupCall::AddrInfo {
                host: Some("example.com".to_string()),
                service: Some("https".to_string()),
                hints: Some(Hints {
                    flags: 0,
                    family: 2,
                    socktype: 1,
                    protocol: 6
                }),
                iface: Some("rmnet0".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn failure_carries_resolver_code() {
        let resolver = FakeResolver::new();
        resolver.set_addrinfo(Err(ResolveError::AddrInfo(libc::EAI_NONAME)));
        let proxy = start_proxy(resolver).await;
        let mut conn = proxy.connect().await;
        conn.send("getaddrinfo nowhere.invalid ^ -1 -1 -1 -1 eth0 0").await;
        let (code, payload) = conn.read_binary().await;
        assert_eq!(code, 401);
        assert_eq!(payload, (libc::EAI_NONAME as u32).to_ne_bytes());
    }

    #[tokio::test]
    async fn panicking_lookup_still_answers() {
        let resolver = FakeResolver::new();
        resolver.panic_on_lookup();
        let proxy = start_proxy(resolver).await;
        let mut conn = proxy.connect().await;
        conn.send("getaddrinfo a ^ -1 -1 -1 -1 ^ 0").await;
        let (code, payload) = conn.read_binary().await;
        assert_eq!(code, 401);
        assert_eq!(payload, (libc::EAI_FAIL as u32).to_ne_bytes());
    }
}
