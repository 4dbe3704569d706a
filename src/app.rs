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

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::time;
use tracing::{Instrument, error, info, info_span, warn};

use crate::command::FrameworkListener;
use crate::dnsproxy::iface::PidInterfaceMap;
use crate::dnsproxy::resolver::Resolver;
use crate::dnsproxy::system::SystemResolver;
use crate::dnsproxy::{self, WorkerContext};
use crate::tether::TetherController;
use crate::tether::commands::{IpFwdCmd, ResolverCmd, TetherCmd, TetherService};
use crate::{config, drain, signal};

pub const NETD_SERVICE_NAME: &str = "netd";

/// Builds the daemon with the host resolver and real kernel interfaces.
pub async fn build(config: config::Config) -> anyhow::Result<Bound> {
    let tether = TetherController::from_config(&config);
    build_with(config, tether, Arc::new(SystemResolver::new())).await
}

/// Builds the daemon around the given controller and resolver.
pub async fn build_with(
    config: config::Config,
    tether: TetherController,
    resolver: Arc<dyn Resolver>,
) -> anyhow::Result<Bound> {
    let shutdown = signal::Shutdown::new();
    // Every listener holds a watcher; the drain completes once all of them, and the
    // blockers they hand out, are gone.
    let (drain_tx, drain_rx) = drain::new();

    let tether = TetherService::new(tether);
    let ifaces = Arc::new(PidInterfaceMap::new());

    let mut netd = FrameworkListener::bind(NETD_SERVICE_NAME, &config.netd_socket, true)
        .with_context(|| format!("bind {}", config.netd_socket.display()))?;
    netd.register(Arc::new(TetherCmd::new(tether.clone())));
    netd.register(Arc::new(IpFwdCmd::new(tether.clone())));
    netd.register(Arc::new(ResolverCmd::new(ifaces.clone())));

    let ctx = WorkerContext::new(resolver, ifaces, config.max_concurrent_queries);
    let dnsproxy = dnsproxy::bind(&config.dnsproxy_socket, ctx)
        .with_context(|| format!("bind {}", config.dnsproxy_socket.display()))?;

    let netd_address = netd.address().to_path_buf();
    let dnsproxy_address = dnsproxy.address().to_path_buf();

    for l in [netd, dnsproxy] {
        let span = info_span!("listener", name = l.name());
        tokio::spawn(l.run(drain_rx.clone()).instrument(span));
    }
    drop(drain_rx);

    Ok(Bound {
        netd_address,
        dnsproxy_address,
        shutdown,
        tether,
        config,
        drain_tx,
    })
}

pub struct Bound {
    pub netd_address: PathBuf,
    pub dnsproxy_address: PathBuf,

    pub shutdown: signal::Shutdown,
    tether: TetherService,
    config: config::Config,
    drain_tx: drain::DrainTrigger,
}

impl Bound {
    pub async fn wait_termination(self) -> anyhow::Result<()> {
        // Wait for a signal or an explicit trigger
        self.shutdown.wait().await;

        // Close both sockets; bounded by the grace period
        match time::timeout(
            self.config.termination_grace_period,
            self.drain_tx.start_drain_and_wait(drain::DrainMode::Graceful),
        )
        .await
        {
            Ok(()) => info!("Shutdown completed gracefully"),
            Err(_) => warn!(
                "Graceful shutdown did not complete in {:?}, terminating now",
                self.config.termination_grace_period
            ),
        }

        match self.tether.call(|tc| tc.stop_tethering()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(component = "tether", "failed to stop tethering: {e}"),
            Err(e) => error!(component = "tether", "failed to stop tethering: {e}"),
        }
        Ok(())
    }
}
