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

//! `tether`, `ipfwd` and `resolver` commands of the netd socket.

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Error, TetherController};
use crate::command::response::{
    COMMAND_OKAY, COMMAND_PARAMETER_ERROR, COMMAND_SYNTAX_ERROR, IP_FWD_STATUS_RESULT,
    OPERATION_FAILED, TETHER_DNS_FWD_TGT_LIST_RESULT, TETHER_INTERFACE_LIST_RESULT,
    TETHER_STATUS_RESULT,
};
use crate::command::{Command, SocketClient};
use crate::dnsproxy::iface::PidInterfaceMap;

/// Shared handle to the one [TetherController].
///
/// Calls are serialized by a mutex and run on the blocking pool, since the controller
/// writes files and waits on child processes.
#[derive(Clone, Debug)]
pub struct TetherService {
    inner: Arc<Mutex<TetherController>>,
}

impl TetherService {
    pub fn new(tc: TetherController) -> Self {
        TetherService {
            inner: Arc::new(Mutex::new(tc)),
        }
    }

    pub async fn call<T, F>(&self, f: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut TetherController) -> T + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut tc = inner.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut tc)
        })
        .await
        .map_err(io::Error::other)
    }
}

async fn tether_result(client: &SocketClient, res: Result<(), Error>) -> io::Result<()> {
    match res {
        Ok(()) => {
            client
                .send_msg(COMMAND_OKAY, "Tether operation succeeded", None)
                .await
        }
        Err(e) => {
            warn!(component = "tether", "tether operation failed: {e}");
            client
                .send_msg(OPERATION_FAILED, "Tether operation failed", Some(e.errno()))
                .await
        }
    }
}

async fn missing_argument(client: &SocketClient) -> io::Result<()> {
    client
        .send_msg(COMMAND_SYNTAX_ERROR, "Missing argument", None)
        .await
}

/// `tether start|stop|status|interface|dns ...`
pub struct TetherCmd {
    svc: TetherService,
}

impl TetherCmd {
    pub fn new(svc: TetherService) -> Self {
        TetherCmd { svc }
    }

    async fn interface(&self, client: &SocketClient, argv: &[String]) -> io::Result<()> {
        match (argv[2].as_str(), argv.get(3)) {
            ("list", None) => {
                let ifaces = self.svc.call(|tc| tc.tethered_interfaces().to_vec()).await?;
                for iface in ifaces {
                    client
                        .send_msg(TETHER_INTERFACE_LIST_RESULT, &iface, None)
                        .await?;
                }
                tether_result(client, Ok(())).await
            }
            ("add", Some(iface)) if argv.len() == 4 => {
                let iface = iface.clone();
                let res = self.svc.call(move |tc| tc.tether_interface(&iface)).await?;
                tether_result(client, res).await
            }
            ("remove", Some(iface)) if argv.len() == 4 => {
                let iface = iface.clone();
                let res = self.svc.call(move |tc| tc.untether_interface(&iface)).await?;
                tether_result(client, res).await
            }
            ("list" | "add" | "remove", _) => missing_argument(client).await,
            _ => unknown(client, "Unknown tether interface operation").await,
        }
    }

    async fn dns(&self, client: &SocketClient, argv: &[String]) -> io::Result<()> {
        match argv[2].as_str() {
            "list" if argv.len() == 3 => {
                let (net_id, servers) = self
                    .svc
                    .call(|tc| (tc.dns_net_id(), tc.dns_forwarders().to_vec()))
                    .await?;
                for server in servers {
                    client
                        .send_msg(
                            TETHER_DNS_FWD_TGT_LIST_RESULT,
                            &format!("{net_id} {server}"),
                            None,
                        )
                        .await?;
                }
                tether_result(client, Ok(())).await
            }
            "set" if argv.len() >= 5 => {
                let Ok(net_id) = argv[3].parse::<u32>() else {
                    return client
                        .send_msg(COMMAND_PARAMETER_ERROR, "Invalid netId", None)
                        .await;
                };
                let servers = argv[4..].to_vec();
                let res = self
                    .svc
                    .call(move |tc| tc.set_dns_forwarders(net_id, &servers))
                    .await?;
                tether_result(client, res).await
            }
            "list" | "set" => missing_argument(client).await,
            _ => unknown(client, "Unknown tether dns operation").await,
        }
    }
}

async fn unknown(client: &SocketClient, msg: &str) -> io::Result<()> {
    client.send_msg(COMMAND_SYNTAX_ERROR, msg, None).await
}

#[async_trait]
impl Command for TetherCmd {
    fn name(&self) -> &'static str {
        "tether"
    }

    async fn run(&self, client: &Arc<SocketClient>, argv: &[String]) -> io::Result<()> {
        let Some(op) = argv.get(1) else {
            return missing_argument(client).await;
        };
        debug!(component = "tether", ?argv, "tether command");
        match op.as_str() {
            "start" => {
                let ranges = argv[2..].to_vec();
                let res = self.svc.call(move |tc| tc.start_tethering(&ranges)).await?;
                tether_result(client, res).await
            }
            "stop" if argv.len() == 2 => {
                let res = self.svc.call(|tc| tc.stop_tethering()).await?;
                tether_result(client, res).await
            }
            "status" if argv.len() == 2 => {
                let started = self.svc.call(|tc| tc.is_tethering_started()).await?;
                let state = if started { "started" } else { "stopped" };
                client
                    .send_msg(
                        TETHER_STATUS_RESULT,
                        &format!("Tethering services {state}"),
                        None,
                    )
                    .await
            }
            "interface" if argv.len() >= 3 => self.interface(client, argv).await,
            "dns" if argv.len() >= 3 => self.dns(client, argv).await,
            "stop" | "status" | "interface" | "dns" => missing_argument(client).await,
            _ => unknown(client, "Unknown tether cmd").await,
        }
    }
}

/// `ipfwd enable|disable <requester>`, `ipfwd status`
pub struct IpFwdCmd {
    svc: TetherService,
}

impl IpFwdCmd {
    pub fn new(svc: TetherService) -> Self {
        IpFwdCmd { svc }
    }
}

#[async_trait]
impl Command for IpFwdCmd {
    fn name(&self) -> &'static str {
        "ipfwd"
    }

    async fn run(&self, client: &Arc<SocketClient>, argv: &[String]) -> io::Result<()> {
        let res = match (argv.get(1).map(String::as_str), argv.len()) {
            (Some("status"), 2) => {
                let count = self.svc.call(|tc| tc.forwarding_request_count()).await?;
                let state = if count > 0 { "enabled" } else { "disabled" };
                return client
                    .send_msg(
                        IP_FWD_STATUS_RESULT,
                        &format!("Forwarding {state}"),
                        None,
                    )
                    .await;
            }
            (Some("enable"), 3) => {
                let requester = argv[2].clone();
                self.svc
                    .call(move |tc| tc.enable_forwarding(&requester))
                    .await?
            }
            (Some("disable"), 3) => {
                let requester = argv[2].clone();
                self.svc
                    .call(move |tc| tc.disable_forwarding(&requester))
                    .await?
            }
            _ => return unknown(client, "Unknown ipfwd cmd").await,
        };
        match res {
            Ok(()) => {
                client
                    .send_msg(COMMAND_OKAY, "ipfwd operation succeeded", None)
                    .await
            }
            Err(e) => {
                warn!(component = "tether", "ipfwd operation failed: {e}");
                client
                    .send_msg(OPERATION_FAILED, "ipfwd operation failed", Some(e.errno()))
                    .await
            }
        }
    }
}

/// `resolver setifaceforpid|clearifaceforpid|setdefaultif ...`
pub struct ResolverCmd {
    ifaces: Arc<PidInterfaceMap>,
}

impl ResolverCmd {
    pub fn new(ifaces: Arc<PidInterfaceMap>) -> Self {
        ResolverCmd { ifaces }
    }
}

#[async_trait]
impl Command for ResolverCmd {
    fn name(&self) -> &'static str {
        "resolver"
    }

    async fn run(&self, client: &Arc<SocketClient>, argv: &[String]) -> io::Result<()> {
        let Some(op) = argv.get(1).map(String::as_str) else {
            return missing_argument(client).await;
        };
        let want = match op {
            "setifaceforpid" => 4,
            "clearifaceforpid" | "setdefaultif" => 3,
            _ => return unknown(client, "Resolver unknown command").await,
        };
        if argv.len() != want {
            return client
                .send_msg(
                    COMMAND_SYNTAX_ERROR,
                    &format!("Wrong number of arguments to resolver {op}"),
                    None,
                )
                .await;
        }
        let pid_arg = match op {
            "setifaceforpid" => Some(&argv[3]),
            "clearifaceforpid" => Some(&argv[2]),
            _ => None,
        };
        let pid = match pid_arg.map(|p| p.parse::<i32>()) {
            Some(Ok(pid)) => pid,
            Some(Err(_)) => {
                return client
                    .send_msg(COMMAND_PARAMETER_ERROR, "Invalid pid", None)
                    .await;
            }
            None => 0,
        };
        match op {
            "setifaceforpid" => self.ifaces.set_iface_for_pid(&argv[2], pid),
            "clearifaceforpid" => self.ifaces.clear_iface_for_pid(pid),
            _ => self.ifaces.set_default_iface(&argv[2]),
        }
        client
            .send_msg(COMMAND_OKAY, "Resolver command succeeded", None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnsproxy::iface::InterfaceLookup;
    use crate::test_helpers::command::CommandConn;
    use crate::test_helpers::tether::{FakeLauncher, RecordingConfigurator, TestSwitches};
    use nix::errno::Errno;

    struct Harness {
        svc: TetherService,
        launcher: FakeLauncher,
        switches: TestSwitches,
    }

    fn harness() -> Harness {
        let switches = TestSwitches::new();
        let launcher = FakeLauncher::default();
        let tc = TetherController::new(
            switches.switches(),
            Box::new(RecordingConfigurator::default()),
            Box::new(launcher.clone()),
            "unknown",
        );
        Harness {
            svc: TetherService::new(tc),
            launcher,
            switches,
        }
    }

    async fn exec(cmd: &dyn Command, line: &str) -> Vec<String> {
        let (client, mut conn) = CommandConn::pair(true);
        client.set_cmd_num(9);
        let argv: Vec<String> = line.split(' ').map(str::to_string).collect();
        cmd.run(&client, &argv).await.unwrap();
        drop(client);
        conn.read_all_text().await
    }

    #[tokio::test]
    async fn tether_lifecycle() {
        let h = harness();
        let cmd = TetherCmd::new(h.svc.clone());

        assert_eq!(
            exec(&cmd, "tether status").await,
            ["210 9 Tethering services stopped"]
        );
        assert_eq!(
            exec(&cmd, "tether start 192.168.42.2 192.168.42.254").await,
            ["200 9 Tether operation succeeded"]
        );
        assert_eq!(
            exec(&cmd, "tether status").await,
            ["210 9 Tethering services started"]
        );
        assert_eq!(
            exec(&cmd, "tether start").await,
            [format!(
                "400 9 Tether operation failed ({})",
                Errno::EBUSY.desc()
            )]
        );
        assert_eq!(
            exec(&cmd, "tether stop").await,
            ["200 9 Tether operation succeeded"]
        );
        assert_eq!(h.launcher.terminations(), 1);
    }

    #[tokio::test]
    async fn tether_interfaces() {
        let h = harness();
        let cmd = TetherCmd::new(h.svc.clone());

        exec(&cmd, "tether interface add wlan0").await;
        exec(&cmd, "tether interface add rndis0").await;
        assert_eq!(
            exec(&cmd, "tether interface list").await,
            [
                "111 9 wlan0",
                "111 9 rndis0",
                "200 9 Tether operation succeeded"
            ]
        );
        assert_eq!(
            exec(&cmd, "tether interface remove usb0").await,
            [format!(
                "400 9 Tether operation failed ({})",
                Errno::ENOENT.desc()
            )]
        );
        assert_eq!(
            exec(&cmd, "tether interface add").await,
            ["500 9 Missing argument"]
        );
        assert_eq!(
            exec(&cmd, "tether interface frob x").await,
            ["500 9 Unknown tether interface operation"]
        );
    }

    #[tokio::test]
    async fn tether_dns() {
        let h = harness();
        let cmd = TetherCmd::new(h.svc.clone());

        assert_eq!(
            exec(&cmd, "tether dns set 100 8.8.8.8 8.8.4.4").await,
            ["200 9 Tether operation succeeded"]
        );
        assert_eq!(
            exec(&cmd, "tether dns list").await,
            [
                "112 9 100 8.8.8.8",
                "112 9 100 8.8.4.4",
                "200 9 Tether operation succeeded"
            ]
        );
        assert_eq!(
            exec(&cmd, "tether dns set abc 8.8.8.8").await,
            ["501 9 Invalid netId"]
        );
        assert_eq!(
            exec(&cmd, "tether dns set 100 10.0.0.1 not-an-ip").await,
            [format!(
                "400 9 Tether operation failed ({})",
                Errno::EINVAL.desc()
            )]
        );
        assert_eq!(
            exec(&cmd, "tether dns list").await,
            ["200 9 Tether operation succeeded"]
        );
        assert_eq!(exec(&cmd, "tether").await, ["500 9 Missing argument"]);
        assert_eq!(exec(&cmd, "tether frob").await, ["500 9 Unknown tether cmd"]);
    }

    #[tokio::test]
    async fn ipfwd() {
        let h = harness();
        let cmd = IpFwdCmd::new(h.svc.clone());

        assert_eq!(
            exec(&cmd, "ipfwd status").await,
            ["211 9 Forwarding disabled"]
        );
        assert_eq!(
            exec(&cmd, "ipfwd enable tethering").await,
            ["200 9 ipfwd operation succeeded"]
        );
        assert_eq!(h.switches.read(), ("1".to_string(), "1".to_string()));
        assert_eq!(
            exec(&cmd, "ipfwd status").await,
            ["211 9 Forwarding enabled"]
        );
        exec(&cmd, "ipfwd disable tethering").await;
        assert_eq!(h.switches.read(), ("0".to_string(), "0".to_string()));
        assert_eq!(exec(&cmd, "ipfwd enable").await, ["500 9 Unknown ipfwd cmd"]);
    }

    #[tokio::test]
    async fn resolver_associations() {
        let map = Arc::new(PidInterfaceMap::new());
        let cmd = ResolverCmd::new(map.clone());

        assert_eq!(
            exec(&cmd, "resolver setifaceforpid wlan0 42").await,
            ["200 9 Resolver command succeeded"]
        );
        assert_eq!(map.interface_for_pid(42).as_deref(), Some("wlan0"));

        exec(&cmd, "resolver setdefaultif rmnet0").await;
        exec(&cmd, "resolver clearifaceforpid 42").await;
        assert_eq!(map.interface_for_pid(42).as_deref(), Some("rmnet0"));

        assert_eq!(
            exec(&cmd, "resolver clearifaceforpid x").await,
            ["501 9 Invalid pid"]
        );
        assert_eq!(
            exec(&cmd, "resolver setdefaultif").await,
            ["500 9 Wrong number of arguments to resolver setdefaultif"]
        );
        assert_eq!(
            exec(&cmd, "resolver flush").await,
            ["500 9 Resolver unknown command"]
        );
    }
}
