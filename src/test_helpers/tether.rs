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

//! Stand-ins for the kernel and the forwarding daemon.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::tether::daemon::{DaemonHandle, DaemonLauncher};
use crate::tether::forwarding::ForwardingSwitches;
use crate::tether::interface::InterfaceConfigurator;

/// Forwarding switch files in a temporary directory.
pub struct TestSwitches {
    _dir: tempfile::TempDir,
    switches: ForwardingSwitches,
}

impl TestSwitches {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let switches = ForwardingSwitches {
            ipv4: dir.path().join("ip_forward"),
            ipv6: dir.path().join("ipv6_forwarding"),
        };
        fs::write(&switches.ipv4, "x").unwrap();
        fs::write(&switches.ipv6, "x").unwrap();
        TestSwitches {
            _dir: dir,
            switches,
        }
    }

    /// Switches whose paths can never be opened.
    pub fn broken() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let switches = ForwardingSwitches {
            ipv4: dir.path().join("missing/ip_forward"),
            ipv6: dir.path().join("missing/ipv6_forwarding"),
        };
        TestSwitches {
            _dir: dir,
            switches,
        }
    }

    pub fn switches(&self) -> ForwardingSwitches {
        self.switches.clone()
    }

    /// Current (ipv4, ipv6) contents.
    pub fn read(&self) -> (String, String) {
        (
            fs::read_to_string(&self.switches.ipv4).unwrap(),
            fs::read_to_string(&self.switches.ipv6).unwrap(),
        )
    }
}

impl Default for TestSwitches {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct ConfiguratorState {
    calls: Vec<(String, &'static str, String)>,
    knobs: HashMap<(String, &'static str), String>,
    fail_on: Option<&'static str>,
}

/// Records every knob write. Clones share state.
#[derive(Clone, Default)]
pub struct RecordingConfigurator {
    state: Arc<Mutex<ConfiguratorState>>,
}

impl RecordingConfigurator {
    fn lock(&self) -> MutexGuard<'_, ConfiguratorState> {
        self.state.lock().unwrap()
    }

    /// Makes every write of `knob` fail.
    pub fn fail_on(&self, knob: &'static str) {
        self.lock().fail_on = Some(knob);
    }

    /// Successful writes as (iface, knob, value), in order.
    pub fn calls(&self) -> Vec<(String, &'static str, String)> {
        self.lock().calls.clone()
    }

    pub fn knob(&self, iface: &str, knob: &'static str) -> Option<String> {
        self.lock().knobs.get(&(iface.to_string(), knob)).cloned()
    }

    pub fn is_client_mode(&self, iface: &str) -> bool {
        [
            ("accept_ra", "1"),
            ("accept_dad", "1"),
            ("dad_transmits", "1"),
            ("disable_ipv6", "1"),
        ]
        .iter()
        .all(|(knob, want)| self.knob(iface, knob).as_deref() == Some(*want))
    }

    fn write(&self, iface: &str, knob: &'static str, value: &str) -> io::Result<()> {
        let mut s = self.lock();
        if s.fail_on == Some(knob) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected"));
        }
        s.calls.push((iface.to_string(), knob, value.to_string()));
        s.knobs.insert((iface.to_string(), knob), value.to_string());
        Ok(())
    }
}

fn flag(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

impl InterfaceConfigurator for RecordingConfigurator {
    fn set_enable_ipv6(&self, iface: &str, enable: bool) -> io::Result<()> {
        self.write(iface, "disable_ipv6", flag(!enable))
    }

    fn set_accept_ipv6_ra(&self, iface: &str, accept: bool) -> io::Result<()> {
        self.write(iface, "accept_ra", flag(accept))
    }

    fn set_accept_ipv6_dad(&self, iface: &str, accept: bool) -> io::Result<()> {
        self.write(iface, "accept_dad", flag(accept))
    }

    fn set_ipv6_dad_transmits(&self, iface: &str, value: &str) -> io::Result<()> {
        self.write(iface, "dad_transmits", value)
    }
}

#[derive(Default)]
struct LauncherState {
    launches: Vec<Vec<String>>,
    frames: Vec<Vec<u8>>,
    terminations: usize,
    fail_launch: bool,
    fail_writes: bool,
}

/// Launches pretend daemons that record what they are sent. Clones share state.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
}

impl FakeLauncher {
    fn lock(&self) -> MutexGuard<'_, LauncherState> {
        self.state.lock().unwrap()
    }

    /// Argument lists of every launch.
    pub fn launches(&self) -> Vec<Vec<String>> {
        self.lock().launches.clone()
    }

    /// Every frame written to any daemon, as sent.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.clone()
    }

    pub fn terminations(&self) -> usize {
        self.lock().terminations
    }

    pub fn fail_launch(&self, fail: bool) {
        self.lock().fail_launch = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }
}

impl DaemonLauncher for FakeLauncher {
    fn launch(&self, args: &[String]) -> io::Result<Box<dyn DaemonHandle>> {
        let mut s = self.lock();
        if s.fail_launch {
            return Err(io::Error::new(io::ErrorKind::NotFound, "injected"));
        }
        s.launches.push(args.to_vec());
        Ok(Box::new(FakeDaemon {
            pid: 1000 + s.launches.len() as u32,
            launcher: self.clone(),
        }))
    }
}

struct FakeDaemon {
    pid: u32,
    launcher: FakeLauncher,
}

impl DaemonHandle for FakeDaemon {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut s = self.launcher.lock();
        if s.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected"));
        }
        s.frames.push(frame.to_vec());
        Ok(())
    }

    fn terminate(self: Box<Self>) -> io::Result<()> {
        self.launcher.lock().terminations += 1;
        Ok(())
    }
}
