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

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

/// Maps a requesting process to the interface its lookups should use.
pub trait InterfaceLookup: Send + Sync {
    fn interface_for_pid(&self, pid: i32) -> Option<String>;
}

#[derive(Debug, Default)]
struct Associations {
    by_pid: HashMap<i32, String>,
    default_iface: Option<String>,
}

/// In-memory pid to interface table, with a fallback default interface.
#[derive(Debug, Default)]
pub struct PidInterfaceMap {
    inner: RwLock<Associations>,
}

impl PidInterfaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Associations> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Associations> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_iface_for_pid(&self, iface: &str, pid: i32) {
        debug!(component = "dnsproxy", iface, pid, "associating pid with interface");
        self.write().by_pid.insert(pid, iface.to_string());
    }

    pub fn clear_iface_for_pid(&self, pid: i32) {
        debug!(component = "dnsproxy", pid, "clearing pid interface");
        self.write().by_pid.remove(&pid);
    }

    /// Sets the interface used for pids without an association. An empty name clears it.
    pub fn set_default_iface(&self, iface: &str) {
        debug!(component = "dnsproxy", iface, "setting default interface");
        self.write().default_iface = (!iface.is_empty()).then(|| iface.to_string());
    }
}

impl InterfaceLookup for PidInterfaceMap {
    fn interface_for_pid(&self, pid: i32) -> Option<String> {
        let a = self.read();
        a.by_pid.get(&pid).or(a.default_iface.as_ref()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_falls_back_to_default() {
        let m = PidInterfaceMap::new();
        assert_eq!(m.interface_for_pid(10), None);

        m.set_default_iface("rmnet0");
        assert_eq!(m.interface_for_pid(10).as_deref(), Some("rmnet0"));

        m.set_iface_for_pid("wlan0", 10);
        assert_eq!(m.interface_for_pid(10).as_deref(), Some("wlan0"));
        assert_eq!(m.interface_for_pid(11).as_deref(), Some("rmnet0"));

        m.clear_iface_for_pid(10);
        assert_eq!(m.interface_for_pid(10).as_deref(), Some("rmnet0"));

        m.set_default_iface("");
        assert_eq!(m.interface_for_pid(10), None);
    }
}
