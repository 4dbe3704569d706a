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

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

/// The two kernel switches that gate IPv4 and IPv6 forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingSwitches {
    pub ipv4: PathBuf,
    pub ipv6: PathBuf,
}

impl Default for ForwardingSwitches {
    fn default() -> Self {
        ForwardingSwitches {
            ipv4: PathBuf::from("/proc/sys/net/ipv4/ip_forward"),
            ipv6: PathBuf::from("/proc/sys/net/ipv6/conf/all/forwarding"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("failed to write {value} to {path}: {source}")]
pub struct SwitchError {
    pub path: PathBuf,
    pub value: &'static str,
    #[source]
    pub source: std::io::Error,
}

/// Tracks who currently needs IP forwarding.
///
/// Forwarding is on iff at least one requester is registered. The switches are only
/// written when the set moves between empty and non-empty.
#[derive(Debug)]
pub struct ForwardingRefCounter {
    requests: BTreeSet<String>,
    switches: ForwardingSwitches,
}

impl ForwardingRefCounter {
    pub fn new(switches: ForwardingSwitches) -> Self {
        ForwardingRefCounter {
            requests: BTreeSet::new(),
            switches,
        }
    }

    /// Registers `requester`. Registering twice is not an error.
    ///
    /// The membership change stands even if writing the switches fails.
    pub fn enable(&mut self, requester: &str) -> Result<(), SwitchError> {
        let trigger = self.requests.is_empty();
        self.requests.insert(requester.to_string());
        if trigger {
            return self.apply();
        }
        Ok(())
    }

    pub fn disable(&mut self, requester: &str) -> Result<(), SwitchError> {
        let was_empty = self.requests.is_empty();
        self.requests.remove(requester);
        if !was_empty && self.requests.is_empty() {
            return self.apply();
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.requests.len()
    }

    pub fn is_enabled(&self) -> bool {
        !self.requests.is_empty()
    }

    pub fn requesters(&self) -> impl Iterator<Item = &str> {
        self.requests.iter().map(String::as_str)
    }

    /// Writes the current state to both switches. Both are attempted even if the first fails.
    pub fn apply(&self) -> Result<(), SwitchError> {
        let value = if self.requests.is_empty() { "0" } else { "1" };
        debug!(component = "tether", "setting IP forward enable = {value}");
        let v4 = write_switch(&self.switches.ipv4, value);
        let v6 = write_switch(&self.switches.ipv6, value);
        v4.and(v6)
    }
}

fn write_switch(path: &Path, value: &'static str) -> Result<(), SwitchError> {
    let res = std::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .and_then(|mut f| f.write_all(value.as_bytes()));
    res.map_err(|source| {
        error!(component = "tether", "failed to write {value} to {}: {source}", path.display());
        SwitchError {
            path: path.to_path_buf(),
            value,
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Switches {
        _dir: TempDir,
        switches: ForwardingSwitches,
    }

    impl Switches {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let switches = ForwardingSwitches {
                ipv4: dir.path().join("ip_forward"),
                ipv6: dir.path().join("forwarding"),
            };
            fs::write(&switches.ipv4, "x").unwrap();
            fs::write(&switches.ipv6, "x").unwrap();
            Switches {
                _dir: dir,
                switches,
            }
        }

        fn read(&self) -> (String, String) {
            (
                fs::read_to_string(&self.switches.ipv4).unwrap(),
                fs::read_to_string(&self.switches.ipv6).unwrap(),
            )
        }

        // Marks both files so a later read shows whether they were rewritten.
        fn taint(&self) {
            fs::write(&self.switches.ipv4, "x").unwrap();
            fs::write(&self.switches.ipv6, "x").unwrap();
        }
    }

    fn pair(v: &str) -> (String, String) {
        (v.to_string(), v.to_string())
    }

    #[test]
    fn writes_only_on_transitions() {
        let sw = Switches::new();
        let mut fwd = ForwardingRefCounter::new(sw.switches.clone());

        fwd.enable("tethering").unwrap();
        assert_eq!(sw.read(), pair("1"));
        assert!(fwd.is_enabled());

        sw.taint();
        fwd.enable("vpn").unwrap();
        fwd.enable("tethering").unwrap();
        assert_eq!(sw.read(), pair("x"), "non-transition must not write");
        assert_eq!(fwd.count(), 2);

        fwd.disable("tethering").unwrap();
        fwd.disable("unknown").unwrap();
        assert_eq!(sw.read(), pair("x"));

        fwd.disable("vpn").unwrap();
        assert_eq!(sw.read(), pair("0"));
        assert!(!fwd.is_enabled());

        sw.taint();
        fwd.disable("vpn").unwrap();
        assert_eq!(sw.read(), pair("x"), "disabling while empty must not write");
    }

    #[test]
    fn write_failure_keeps_membership() {
        let dir = tempfile::tempdir().unwrap();
        let switches = ForwardingSwitches {
            ipv4: dir.path().join("missing/ip_forward"),
            ipv6: dir.path().join("forwarding"),
        };
        fs::write(&switches.ipv6, "x").unwrap();
        let mut fwd = ForwardingRefCounter::new(switches.clone());

        let err = fwd.enable("tethering").unwrap_err();
        assert_eq!(err.path, switches.ipv4);
        assert_eq!(err.value, "1");
        assert_eq!(fwd.count(), 1);
        // the second switch is still attempted
        assert_eq!(fs::read_to_string(&switches.ipv6).unwrap(), "1");
    }

    #[test]
    fn requesters_are_listed() {
        let sw = Switches::new();
        let mut fwd = ForwardingRefCounter::new(sw.switches.clone());
        fwd.enable("b").unwrap();
        fwd.enable("a").unwrap();
        assert_eq!(fwd.requesters().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
