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

use nix::errno::Errno;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use daemon::{DaemonHandle, DaemonLauncher, ProcessLauncher};
use forwarding::{ForwardingRefCounter, ForwardingSwitches, SwitchError};
use interface::{InterfaceConfigurator, ProcSysConfigurator, is_iface_name};
use protocol::Fwmark;

pub mod commands;
pub mod daemon;
pub mod forwarding;
pub mod interface;
pub mod protocol;

/// Boot mode in which forwarding is forced on for diagnostics.
pub const BP_TOOLS_MODE: &str = "bp-tools";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid interface name {0:?}")]
    InvalidName(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("interface {0} is already tethered")]
    AlreadyTethered(String),
    #[error("tethering already started")]
    AlreadyRunning,
    #[error("interface {0} is not tethered")]
    NotFound(String),
    #[error("failed to start tethering daemon: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to stop tethering daemon: {0}")]
    Stop(#[source] io::Error),
    #[error("failed to configure {iface}: {source}")]
    InterfaceConfig {
        iface: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to send update to tethering daemon: {0}")]
    DaemonUpdate(#[source] io::Error),
    #[error(transparent)]
    Forwarding(#[from] SwitchError),
}

impl Error {
    /// The errno reported to command socket clients.
    pub fn errno(&self) -> Errno {
        fn os(e: &io::Error) -> Errno {
            e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::EIO)
        }
        match self {
            Error::InvalidName(_) | Error::NotFound(_) => Errno::ENOENT,
            Error::InvalidArgument(_) => Errno::EINVAL,
            Error::AlreadyTethered(_) => Errno::EEXIST,
            Error::AlreadyRunning => Errno::EBUSY,
            Error::DaemonUpdate(_) => Errno::EREMOTEIO,
            Error::Spawn(e) | Error::Stop(e) => os(e),
            Error::InterfaceConfig { source, .. } => os(source),
            Error::Forwarding(e) => os(&e.source),
        }
    }
}

/// Owns IP forwarding, the tethered interface set, the DNS forwarder list and the
/// DNS forwarding daemon.
///
/// Every operation takes `&mut self`; callers that share a controller must serialize
/// access (see [commands::TetherService]).
pub struct TetherController {
    forwarding: ForwardingRefCounter,
    interfaces: Vec<String>,
    dns_net_id: u32,
    dns_forwarders: Vec<String>,
    daemon: Option<Box<dyn DaemonHandle>>,
    configurator: Box<dyn InterfaceConfigurator>,
    launcher: Box<dyn DaemonLauncher>,
}

impl TetherController {
    pub fn new(
        switches: ForwardingSwitches,
        configurator: Box<dyn InterfaceConfigurator>,
        launcher: Box<dyn DaemonLauncher>,
        boot_mode: &str,
    ) -> Self {
        let mut tc = TetherController {
            forwarding: ForwardingRefCounter::new(switches),
            interfaces: Vec::new(),
            dns_net_id: 0,
            dns_forwarders: Vec::new(),
            daemon: None,
            configurator,
            launcher,
        };
        let res = if boot_mode == BP_TOOLS_MODE {
            info!(component = "tether", "in {BP_TOOLS_MODE} mode, forcing IP forwarding on");
            tc.forwarding.enable(BP_TOOLS_MODE)
        } else {
            tc.forwarding.apply()
        };
        if let Err(e) = res {
            warn!(component = "tether", "failed to initialize IP forwarding: {e}");
        }
        tc
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            ForwardingSwitches {
                ipv4: cfg.ipv4_forwarding_path.clone(),
                ipv6: cfg.ipv6_forwarding_path.clone(),
            },
            Box::new(ProcSysConfigurator::new(cfg.ipv6_conf_root.clone())),
            Box::new(ProcessLauncher::new(cfg.tether_daemon_path.clone())),
            &cfg.boot_mode,
        )
    }

    pub fn enable_forwarding(&mut self, requester: &str) -> Result<(), Error> {
        Ok(self.forwarding.enable(requester)?)
    }

    pub fn disable_forwarding(&mut self, requester: &str) -> Result<(), Error> {
        Ok(self.forwarding.disable(requester)?)
    }

    pub fn forwarding_request_count(&self) -> usize {
        self.forwarding.count()
    }

    /// Spawns the DNS forwarding daemon serving the given DHCP ranges, given as
    /// consecutive (low, high) pairs.
    pub fn start_tethering<S: AsRef<str>>(&mut self, dhcp_ranges: &[S]) -> Result<(), Error> {
        if self.daemon.is_some() {
            error!(component = "tether", "tethering already started");
            return Err(Error::AlreadyRunning);
        }
        if dhcp_ranges.len() % 2 != 0 {
            return Err(Error::InvalidArgument(format!(
                "DHCP ranges must come in pairs, got {} addresses",
                dhcp_ranges.len()
            )));
        }

        debug!(component = "tether", "starting tethering services");
        let args = daemon::daemon_args(dhcp_ranges);
        let daemon = self.launcher.launch(&args).map_err(|e| {
            error!(component = "tether", "failed to spawn daemon: {e}");
            Error::Spawn(e)
        })?;
        let pid = daemon.pid();
        self.daemon = Some(daemon);

        if let Err(e) = self.apply_dns_interfaces() {
            warn!(component = "tether", "failed to push interfaces to new daemon: {e}");
        }
        info!(component = "tether", pid, "tethering services running");
        Ok(())
    }

    /// Stops the daemon. Stopping when nothing runs is a no-op.
    pub fn stop_tethering(&mut self) -> Result<(), Error> {
        let Some(daemon) = self.daemon.take() else {
            debug!(component = "tether", "tethering already stopped");
            return Ok(());
        };
        debug!(component = "tether", pid = daemon.pid(), "stopping tethering services");
        daemon.terminate().map_err(Error::Stop)?;
        info!(component = "tether", "tethering services stopped");
        Ok(())
    }

    pub fn is_tethering_started(&self) -> bool {
        self.daemon.is_some()
    }

    pub fn tether_interface(&mut self, iface: &str) -> Result<(), Error> {
        debug!(component = "tether", iface, "tether interface");
        if !is_iface_name(iface) {
            return Err(Error::InvalidName(iface.to_string()));
        }
        if self.interfaces.iter().any(|i| i == iface) {
            return Err(Error::AlreadyTethered(iface.to_string()));
        }

        if let Err(source) = self.configurator.configure_for_router(iface) {
            self.configurator.configure_for_client(iface);
            return Err(Error::InterfaceConfig {
                iface: iface.to_string(),
                source,
            });
        }

        self.interfaces.push(iface.to_string());
        if let Err(e) = self.apply_dns_interfaces() {
            self.interfaces.pop();
            self.configurator.configure_for_client(iface);
            return Err(Error::DaemonUpdate(e));
        }
        Ok(())
    }

    /// Removes `iface`. A failed daemon update is reported but the removal stands.
    pub fn untether_interface(&mut self, iface: &str) -> Result<(), Error> {
        debug!(component = "tether", iface, "untether interface");
        let Some(idx) = self.interfaces.iter().position(|i| i == iface) else {
            return Err(Error::NotFound(iface.to_string()));
        };
        self.interfaces.remove(idx);
        self.configurator.configure_for_client(iface);
        self.apply_dns_interfaces().map_err(Error::DaemonUpdate)
    }

    pub fn tethered_interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Replaces the upstream DNS servers.
    ///
    /// An unparsable server fails the call and leaves the list empty. Servers that do not
    /// fit in one update frame are dropped.
    pub fn set_dns_forwarders<S: AsRef<str>>(
        &mut self,
        net_id: u32,
        servers: &[S],
    ) -> Result<(), Error> {
        let mark = Fwmark::for_dns_forwarding(net_id);
        let servers: Vec<String> = servers.iter().map(|s| s.as_ref().to_string()).collect();

        self.dns_forwarders.clear();
        let update = protocol::update_dns(mark, &servers).map_err(|e| {
            error!(component = "tether", "{e}");
            Error::InvalidArgument(e.to_string())
        })?;
        self.dns_forwarders = update.servers;
        self.dns_net_id = net_id;

        if let Some(daemon) = self.daemon.as_mut() {
            debug!(component = "tether", "sending update msg to daemon [{}]", update.frame);
            if let Err(e) = daemon.write_frame(&update.frame.to_wire()) {
                error!(component = "tether", "failed to send update command to daemon: {e}");
                self.dns_forwarders.clear();
                return Err(Error::DaemonUpdate(e));
            }
        }
        Ok(())
    }

    pub fn dns_net_id(&self) -> u32 {
        self.dns_net_id
    }

    pub fn dns_forwarders(&self) -> &[String] {
        &self.dns_forwarders
    }

    /// Pushes the interface list to the daemon. Having no daemon or no interfaces is not
    /// an error; only a failed write is.
    fn apply_dns_interfaces(&mut self) -> io::Result<()> {
        let Some(frame) = protocol::update_ifaces(&self.interfaces) else {
            return Ok(());
        };
        let Some(daemon) = self.daemon.as_mut() else {
            return Ok(());
        };
        debug!(component = "tether", "sending update msg to daemon [{frame}]");
        daemon.write_frame(&frame.to_wire()).inspect_err(|e| {
            error!(component = "tether", "failed to send update command to daemon: {e}");
        })
    }
}

impl std::fmt::Debug for TetherController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetherController")
            .field("forwarding", &self.forwarding)
            .field("interfaces", &self.interfaces)
            .field("dns_net_id", &self.dns_net_id)
            .field("dns_forwarders", &self.dns_forwarders)
            .field("daemon", &self.daemon.as_ref().map(|d| d.pid()))
            .finish_non_exhaustive()
    }
}
