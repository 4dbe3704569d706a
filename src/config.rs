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
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;

const NETD_CONFIG: &str = "NETD_CONFIG";
const NETD_SOCKET: &str = "NETD_SOCKET";
const DNSPROXYD_SOCKET: &str = "DNSPROXYD_SOCKET";
const TETHER_DAEMON_PATH: &str = "TETHER_DAEMON_PATH";
const IPV4_FORWARDING_PATH: &str = "IPV4_FORWARDING_PATH";
const IPV6_FORWARDING_PATH: &str = "IPV6_FORWARDING_PATH";
const IPV6_CONF_ROOT: &str = "IPV6_CONF_ROOT";
const BOOT_MODE: &str = "BOOT_MODE";
const DNSPROXY_MAX_CONCURRENT_QUERIES: &str = "DNSPROXY_MAX_CONCURRENT_QUERIES";
const TERMINATION_GRACE_PERIOD: &str = "TERMINATION_GRACE_PERIOD";
const NETD_WORKER_THREADS: &str = "NETD_WORKER_THREADS";

const DEFAULT_NETD_SOCKET: &str = "/dev/socket/netd";
const DEFAULT_DNSPROXYD_SOCKET: &str = "/dev/socket/dnsproxyd";
const DEFAULT_TETHER_DAEMON_PATH: &str = "/system/bin/dnsmasq";
const DEFAULT_IPV4_FORWARDING_PATH: &str = "/proc/sys/net/ipv4/ip_forward";
const DEFAULT_IPV6_FORWARDING_PATH: &str = "/proc/sys/net/ipv6/conf/all/forwarding";
const DEFAULT_IPV6_CONF_ROOT: &str = "/proc/sys/net/ipv6/conf";
const DEFAULT_BOOT_MODE: &str = "unknown";
const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 64;
const DEFAULT_WORKER_THREADS: usize = 2;
const DEFAULT_DRAIN_DURATION: Duration = Duration::from_secs(5);

#[derive(serde::Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Command socket for tethering, forwarding and resolver commands.
    pub netd_socket: PathBuf,
    /// Command socket for DNS lookups.
    pub dnsproxy_socket: PathBuf,

    /// DHCP/DNS forwarding daemon spawned when tethering starts.
    pub tether_daemon_path: PathBuf,
    pub ipv4_forwarding_path: PathBuf,
    pub ipv6_forwarding_path: PathBuf,
    /// Directory holding the per-interface IPv6 knobs.
    pub ipv6_conf_root: PathBuf,
    pub boot_mode: String,

    /// Lookups allowed to run at once; further requests wait for a slot.
    pub max_concurrent_queries: usize,

    pub termination_grace_period: Duration,

    /// Specify the number of worker threads the Tokio Runtime will use.
    pub num_worker_threads: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid env var {0}={1}")]
    EnvVar(String, String),
    #[error("error parsing config file: {0}")]
    ConfigFile(anyhow::Error),
}

/// Duration accepting strings such as `5s` or `1m30s`.
struct HumanDuration(Duration);

impl FromStr for HumanDuration {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        duration_str::parse(s).map(HumanDuration).map_err(|_| ())
    }
}

fn parse<T: FromStr>(env: &str) -> Result<Option<T>, Error> {
    match std::env::var(env) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|_| Error::EnvVar(env.to_string(), val)),
        Err(_) => Ok(None),
    }
}

/// Settings that may come from the YAML file named by `NETD_CONFIG`.
/// Environment variables take precedence over every field.
#[derive(serde::Deserialize, Default, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
    pub netd_socket: Option<PathBuf>,
    pub dnsproxy_socket: Option<PathBuf>,
    pub tether_daemon_path: Option<PathBuf>,
    pub ipv4_forwarding_path: Option<PathBuf>,
    pub ipv6_forwarding_path: Option<PathBuf>,
    pub ipv6_conf_root: Option<PathBuf>,
    pub boot_mode: Option<String>,
    pub max_concurrent_queries: Option<usize>,
    pub termination_grace_period: Option<String>,
    pub worker_threads: Option<usize>,
}

pub fn parse_config() -> Result<Config, Error> {
    let fc = match parse::<PathBuf>(NETD_CONFIG)? {
        Some(path) => construct_file_config(&path).map_err(Error::ConfigFile)?,
        None => FileConfig::default(),
    };
    construct_config(fc)
}

fn construct_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    let f = fs::File::open(path).map_err(|e| anyhow!("failed opening {}: {e}", path.display()))?;
    serde_yaml::from_reader::<_, Option<FileConfig>>(f)
        .map(Option::unwrap_or_default)
        .map_err(|e| anyhow!("failed parsing {}: {e}", path.display()))
}

pub fn construct_config(fc: FileConfig) -> Result<Config, Error> {
    let file_grace = fc
        .termination_grace_period
        .map(|v| {
            duration_str::parse(&v).map_err(|e| {
                Error::ConfigFile(anyhow!("invalid terminationGracePeriod {v:?}: {e}"))
            })
        })
        .transpose()?;

    Ok(Config {
        netd_socket: parse(NETD_SOCKET)?
            .or(fc.netd_socket)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_NETD_SOCKET)),
        dnsproxy_socket: parse(DNSPROXYD_SOCKET)?
            .or(fc.dnsproxy_socket)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DNSPROXYD_SOCKET)),
        tether_daemon_path: parse(TETHER_DAEMON_PATH)?
            .or(fc.tether_daemon_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TETHER_DAEMON_PATH)),
        ipv4_forwarding_path: parse(IPV4_FORWARDING_PATH)?
            .or(fc.ipv4_forwarding_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IPV4_FORWARDING_PATH)),
        ipv6_forwarding_path: parse(IPV6_FORWARDING_PATH)?
            .or(fc.ipv6_forwarding_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IPV6_FORWARDING_PATH)),
        ipv6_conf_root: parse(IPV6_CONF_ROOT)?
            .or(fc.ipv6_conf_root)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IPV6_CONF_ROOT)),
        boot_mode: parse(BOOT_MODE)?
            .or(fc.boot_mode)
            .unwrap_or_else(|| DEFAULT_BOOT_MODE.to_string()),

        max_concurrent_queries: parse(DNSPROXY_MAX_CONCURRENT_QUERIES)?
            .or(fc.max_concurrent_queries)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_QUERIES),

        termination_grace_period: parse(TERMINATION_GRACE_PERIOD)?
            .map(|d: HumanDuration| d.0)
            .or(file_grace)
            .unwrap_or(DEFAULT_DRAIN_DURATION),

        num_worker_threads: parse(NETD_WORKER_THREADS)?
            .or(fc.worker_threads)
            .unwrap_or(DEFAULT_WORKER_THREADS),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let cfg = construct_config(FileConfig::default()).unwrap();
        assert_eq!(cfg.dnsproxy_socket, PathBuf::from(DEFAULT_DNSPROXYD_SOCKET));
        assert_eq!(cfg.ipv6_conf_root, PathBuf::from(DEFAULT_IPV6_CONF_ROOT));
        assert_eq!(cfg.max_concurrent_queries, DEFAULT_MAX_CONCURRENT_QUERIES);
        assert_eq!(cfg.termination_grace_period, DEFAULT_DRAIN_DURATION);
        assert_eq!(cfg.num_worker_threads, DEFAULT_WORKER_THREADS);
    }

    #[test]
    fn config_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
dnsproxySocket: /tmp/dnsproxyd
bootMode: bp-tools
maxConcurrentQueries: 8
terminationGracePeriod: 1m30s
"#
        )
        .unwrap();
        let fc = construct_file_config(f.path()).unwrap();
        assert_eq!(fc.boot_mode.as_deref(), Some("bp-tools"));

        let cfg = construct_config(fc).unwrap();
        assert_eq!(cfg.dnsproxy_socket, PathBuf::from("/tmp/dnsproxyd"));
        assert_eq!(cfg.boot_mode, "bp-tools");
        assert_eq!(cfg.max_concurrent_queries, 8);
        assert_eq!(cfg.termination_grace_period, Duration::from_secs(90));
    }

    #[test]
    fn empty_file_is_default() {
        let f = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(construct_file_config(f.path()).unwrap(), FileConfig::default());
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "netdSockett: /tmp/x").unwrap();
        assert!(construct_file_config(f.path()).is_err());
    }

    #[test]
    fn bad_file_duration() {
        let fc = FileConfig {
            termination_grace_period: Some("soon".to_string()),
            ..Default::default()
        };
        let err = construct_config(fc).unwrap_err();
        assert!(matches!(err, Error::ConfigFile(_)));
        assert!(err.to_string().contains("terminationGracePeriod"));
    }
}
