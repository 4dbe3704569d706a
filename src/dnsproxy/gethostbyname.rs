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

use super::resolver::NO_RECOVERY;
use super::{WorkerContext, atoi, optional, reject_arity, wire};
use crate::command::{Command, SocketClient};

/// `gethostbyname <pid> <iface> <name> <family>`
pub struct GetHostByNameCmd {
    ctx: WorkerContext,
}

impl GetHostByNameCmd {
    pub fn new(ctx: WorkerContext) -> Self {
        GetHostByNameCmd { ctx }
    }
}

#[async_trait]
impl Command for GetHostByNameCmd {
    fn name(&self) -> &'static str {
        "gethostbyname"
    }

    async fn run(&self, client: &Arc<SocketClient>, argv: &[String]) -> io::Result<()> {
        if argv.len() != 5 {
            return reject_arity(client, self.name(), argv.len()).await;
        }
        let pid = atoi(&argv[1]);
        let iface = optional(&argv[2]);
        let name = optional(&argv[3]);
        let family = atoi(&argv[4]);
        debug!(component = "dnsproxy", ?name, family, ?iface, pid, "gethostbyname");

        self.ctx
            .spawn(
                "gethostbyname",
                client,
                NO_RECOVERY as u32,
                move |ctx: &WorkerContext| {
                    let iface = ctx.effective_iface(iface, pid);
                    match ctx.resolver.gethostbyname(name.as_deref(), family, iface.as_deref()) {
                        Ok(h) => wire::hostent_response(&h),
                        Err(e) => {
                            debug!(component = "dnsproxy", "gethostbyname failed: {e}");
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
    use crate::dnsproxy::resolver::{HOST_NOT_FOUND, HostEnt, ResolveError};
    use crate::test_helpers::dns::{FakeResolver, LookupCall, start_proxy};

    #[tokio::test]
    async fn hostent_roundtrip_over_socket() {
        let resolver = FakeResolver::new();
        let entry = HostEnt {
            name: Some("mail.example.com".to_string()),
            aliases: vec!["smtp.example.com".to_string()],
            addrtype: libc::AF_INET,
            length: 4,
            addrs: vec![vec![192, 0, 2, 1], vec![192, 0, 2, 2]],
        };
        resolver.set_hostent(Ok(entry.clone()));
        let proxy = start_proxy(resolver.clone()).await;
        proxy.lookup.set_default_iface("wlan0");

        let mut conn = proxy.connect().await;
        conn.send("gethostbyname 12 ^ mail.example.com 2").await;
        assert_eq!(conn.read_code().await, 222);
        assert_eq!(conn.read_hostent().await, entry);
        assert_eq!(
            resolver.calls(),
            vec![LookupCall::HostByName {
                name: Some("mail.example.com".to_string()),
                family: libc::AF_INET,
                iface: Some("wlan0".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn failure_and_arity() {
        let resolver = FakeResolver::new();
        resolver.set_hostent(Err(ResolveError::Host(HOST_NOT_FOUND)));
        let proxy = start_proxy(resolver.clone()).await;
        let mut conn = proxy.connect().await;

        conn.send("gethostbyname 12 ^ nothing").await;
        assert_eq!(
            conn.read_text().await,
            "501 Invalid number of arguments to gethostbyname: 4"
        );
        assert!(resolver.calls().is_empty());

        conn.send("gethostbyname 12 eth0 nothing 2").await;
        let (code, payload) = conn.read_binary().await;
        assert_eq!(code, 401);
        assert_eq!(payload, (HOST_NOT_FOUND as u32).to_ne_bytes());
    }
}
