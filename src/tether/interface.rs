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
use std::io::Write;
use std::path::PathBuf;

use tracing::{trace, warn};

/// Linux IFNAMSIZ, including the trailing NUL.
pub const IFNAMSIZ: usize = 16;

/// Whether `name` is acceptable as an interface identifier: at most IFNAMSIZ bytes,
/// alphanumeric first character, then alphanumerics, `_`, `-` or `:`.
pub fn is_iface_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > IFNAMSIZ {
        return false;
    }
    if !bytes[0].is_ascii_alphanumeric() {
        return false;
    }
    bytes[1..]
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b':'))
}

/// Per-interface IPv6 knobs. Implementations talk to the kernel; the controller only
/// sequences the calls.
pub trait InterfaceConfigurator: Send + Sync {
    fn set_enable_ipv6(&self, iface: &str, enable: bool) -> io::Result<()>;
    fn set_accept_ipv6_ra(&self, iface: &str, accept: bool) -> io::Result<()>;
    fn set_accept_ipv6_dad(&self, iface: &str, accept: bool) -> io::Result<()>;
    fn set_ipv6_dad_transmits(&self, iface: &str, value: &str) -> io::Result<()>;

    /// Puts `iface` into router mode: IPv6 is cycled off and on with RA and DAD disabled.
    /// Stops at the first failing step.
    fn configure_for_router(&self, iface: &str) -> io::Result<()> {
        self.set_enable_ipv6(iface, false)?;
        self.set_accept_ipv6_ra(iface, false)?;
        self.set_accept_ipv6_dad(iface, false)?;
        self.set_ipv6_dad_transmits(iface, "0")?;
        self.set_enable_ipv6(iface, true)
    }

    /// Reverts `iface` to client mode. Every step is attempted; failures are only logged.
    fn configure_for_client(&self, iface: &str) {
        let steps = [
            ("accept_ra", self.set_accept_ipv6_ra(iface, true)),
            ("accept_dad", self.set_accept_ipv6_dad(iface, true)),
            ("dad_transmits", self.set_ipv6_dad_transmits(iface, "1")),
            ("disable_ipv6", self.set_enable_ipv6(iface, false)),
        ];
        for (step, res) in steps {
            if let Err(e) = res {
                warn!(component = "tether", iface, step, "failed to restore client mode: {e}");
            }
        }
    }
}

/// Writes the knobs under `/proc/sys/net/ipv6/conf/<iface>/`.
#[derive(Debug, Clone)]
pub struct ProcSysConfigurator {
    root: PathBuf,
}

impl Default for ProcSysConfigurator {
    fn default() -> Self {
        ProcSysConfigurator::new(PathBuf::from("/proc/sys/net/ipv6/conf"))
    }
}

impl ProcSysConfigurator {
    pub fn new(root: PathBuf) -> Self {
        ProcSysConfigurator { root }
    }

    fn write(&self, iface: &str, knob: &str, value: &str) -> io::Result<()> {
        // iface ends up as a path component
        if iface.is_empty() || iface.contains('/') || iface == "." || iface == ".." {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid interface name {iface:?}"),
            ));
        }
        let path = self.root.join(iface).join(knob);
        trace!("writing {value} to {}", path.display());
        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)?
            .write_all(value.as_bytes())
    }
}

fn flag(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

impl InterfaceConfigurator for ProcSysConfigurator {
    fn set_enable_ipv6(&self, iface: &str, enable: bool) -> io::Result<()> {
        // the kernel knob is inverted
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
