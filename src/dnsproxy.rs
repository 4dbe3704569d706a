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

//! The `dnsproxyd` command socket.
//!
//! Each accepted lookup is validated on the connection's dispatch path and then
//! resolved on the blocking pool. The worker holds a clone of the connection's
//! [SocketClient] and a semaphore permit until its single response is written.
//! The interface of the requesting pid is looked up by the worker once it holds
//! its permit, so a queued request sees the latest association.

use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, warn};

use crate::command::{FrameworkListener, SocketClient};

pub mod getaddrinfo;
pub mod gethostbyaddr;
pub mod gethostbyname;
pub mod iface;
pub mod resolver;
pub mod system;
pub mod wire;

use iface::InterfaceLookup;
use resolver::Resolver;

pub const SERVICE_NAME: &str = "dnsproxyd";

/// Token standing in for an absent positional argument.
pub const UNSET: &str = "^";

fn optional(arg: &str) -> Option<String> {
    (arg != UNSET).then(|| arg.to_string())
}

/// C `atoi`: leading whitespace, an optional sign, then digits. Anything else is 0.
fn atoi(arg: &str) -> i32 {
    let s = arg.trim_start();
    let (neg, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut n: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        n = (n * 10 + i64::from(b - b'0')).min(i64::from(i32::MAX) + 1);
    }
    let n = if neg { -n } else { n };
    n.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// What every lookup worker needs.
#[derive(Clone)]
pub struct WorkerContext {
    resolver: Arc<dyn Resolver>,
    lookup: Arc<dyn InterfaceLookup>,
    permits: Arc<Semaphore>,
}

impl WorkerContext {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        lookup: Arc<dyn InterfaceLookup>,
        max_concurrent: usize,
    ) -> Self {
        WorkerContext {
            resolver,
            lookup,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// An explicit interface wins; otherwise the one associated with `pid`.
    fn effective_iface(&self, iface: Option<String>, pid: i32) -> Option<String> {
        iface.or_else(|| self.lookup.interface_for_pid(pid))
    }

    /// Runs `work` on the blocking pool and writes whatever it returns to `client`.
    ///
    /// Waits for a permit first, so a connection that floods the proxy stalls only
    /// itself. If `work` panics the client gets a `401` with `fail_code`.
    async fn spawn<F>(
        &self,
        op: &'static str,
        client: &Arc<SocketClient>,
        fail_code: u32,
        work: F,
    ) -> io::Result<()>
    where
        F: FnOnce(&WorkerContext) -> BytesMut + Send + 'static,
    {
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return client.send_data(&wire::failure(fail_code)).await;
        };
        let client = client.clone();
        let ctx = self.clone();
        tokio::spawn(
            async move {
                let res = tokio::task::spawn_blocking(move || work(&ctx)).await;
                let buf = res.unwrap_or_else(|e| {
                    warn!(component = "dnsproxy", op, "lookup worker failed: {e}");
                    wire::failure(fail_code)
                });
                if let Err(e) = client.send_data(&buf).await {
                    debug!(component = "dnsproxy", op, "failed to send response: {e}");
                }
                drop(permit);
            }
            .in_current_span(),
        );
        Ok(())
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

async fn reject_arity(client: &SocketClient, cmd: &str, argc: usize) -> io::Result<()> {
    warn!(component = "dnsproxy", cmd, argc, "invalid number of arguments");
    client
        .send_msg(
            crate::command::response::COMMAND_PARAMETER_ERROR,
            &format!("Invalid number of arguments to {cmd}: {argc}"),
            None,
        )
        .await
}

/// Binds the proxy socket with the three lookup commands registered.
pub fn bind(path: &Path, ctx: WorkerContext) -> io::Result<FrameworkListener> {
    let mut l = FrameworkListener::bind(SERVICE_NAME, path, false)?;
    l.register(Arc::new(getaddrinfo::GetAddrInfoCmd::new(ctx.clone())));
    l.register(Arc::new(gethostbyname::GetHostByNameCmd::new(ctx.clone())));
    l.register(Arc::new(gethostbyaddr::GetHostByAddrCmd::new(ctx)));
    Ok(l)
}
