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

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::{self, FileConfig};

pub mod command;
pub mod dns;
pub mod helpers;
pub mod tether;

/// A config whose sockets, switches and sysctl tree all live under `dir`.
/// The daemon binary is `/bin/false`; tests that need a live daemon use
/// [tether::FakeLauncher] instead.
pub fn test_config(dir: &Path) -> config::Config {
    let ipv4 = dir.join("ip_forward");
    let ipv6 = dir.join("ipv6_forwarding");
    let conf = dir.join("conf");
    for p in [&ipv4, &ipv6] {
        fs::write(p, "0").unwrap();
    }
    fs::create_dir_all(&conf).unwrap();
    config::Config {
        netd_socket: dir.join("netd"),
        dnsproxy_socket: dir.join("dnsproxyd"),
        tether_daemon_path: "/bin/false".into(),
        ipv4_forwarding_path: ipv4,
        ipv6_forwarding_path: ipv6,
        ipv6_conf_root: conf,
        boot_mode: "unknown".to_string(),
        max_concurrent_queries: 4,
        termination_grace_period: Duration::from_secs(1),
        ..config::construct_config(FileConfig::default()).unwrap()
    }
}

/// Creates the sysctl knobs for `iface` under a config's `ipv6_conf_root`.
pub fn add_test_interface(cfg: &config::Config, iface: &str) {
    let dir = cfg.ipv6_conf_root.join(iface);
    fs::create_dir_all(&dir).unwrap();
    for knob in ["disable_ipv6", "accept_ra", "accept_dad", "dad_transmits"] {
        fs::write(dir.join(knob), "").unwrap();
    }
}
