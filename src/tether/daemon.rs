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
use std::process::{Child, ChildStdin, Command, Stdio};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// Flags the DNS forwarding daemon always runs with.
pub const FIXED_ARGS: [&str; 7] = [
    "--keep-in-foreground",
    "--no-resolv",
    "--no-poll",
    "--dhcp-authoritative",
    "--dhcp-option-force=43,ANDROID_METERED",
    "--pid-file",
    "",
];

/// Builds the daemon argument list. `dhcp_ranges` is read as consecutive (low, high)
/// pairs; callers must pass an even number of entries.
pub fn daemon_args<S: AsRef<str>>(dhcp_ranges: &[S]) -> Vec<String> {
    let ranges = dhcp_ranges
        .chunks_exact(2)
        .map(|r| format!("--dhcp-range={},{},1h", r[0].as_ref(), r[1].as_ref()));
    FIXED_ARGS
        .iter()
        .map(|s| s.to_string())
        .chain(ranges)
        .collect()
}

/// A running DNS forwarding daemon and the write end of its stdin.
pub trait DaemonHandle: Send {
    fn pid(&self) -> u32;

    /// Writes one complete update frame.
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Sends SIGTERM, waits for the process to exit and closes the pipe.
    fn terminate(self: Box<Self>) -> io::Result<()>;
}

pub trait DaemonLauncher: Send + Sync {
    fn launch(&self, args: &[String]) -> io::Result<Box<dyn DaemonHandle>>;
}

/// Launches the daemon binary as a child process with a piped stdin.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    binary: PathBuf,
}

impl ProcessLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        ProcessLauncher {
            binary: binary.into(),
        }
    }
}

impl DaemonLauncher for ProcessLauncher {
    fn launch(&self, args: &[String]) -> io::Result<Box<dyn DaemonHandle>> {
        debug!(component = "tether", binary = %self.binary.display(), ?args, "spawning daemon");
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::piped())
            .spawn()?;
        let Some(stdin) = child.stdin.take() else {
            // Not expected with Stdio::piped, but don't leave the child behind.
            let _ = child.kill();
            let _ = child.wait();
            return Err(io::Error::other("daemon stdin was not captured"));
        };
        Ok(Box::new(ChildDaemon {
            child,
            stdin: Some(stdin),
        }))
    }
}

struct ChildDaemon {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl DaemonHandle for ChildDaemon {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(frame),
            None => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
        }
    }

    fn terminate(mut self: Box<Self>) -> io::Result<()> {
        let pid = Pid::from_raw(self.child.id() as i32);
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            // Most likely already gone; wait() below reaps it either way.
            warn!(component = "tether", %pid, "failed to signal daemon: {e}");
        }
        let status = self.child.wait();
        drop(self.stdin.take());
        let status = status?;
        debug!(component = "tether", %pid, %status, "daemon exited");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_include_ranges() {
        let args = daemon_args(&["192.168.42.2", "192.168.42.254", "192.168.43.2", "192.168.43.254"]);
        assert_eq!(&args[..FIXED_ARGS.len()], FIXED_ARGS.map(String::from).as_slice());
        assert_eq!(
            &args[FIXED_ARGS.len()..],
            &[
                "--dhcp-range=192.168.42.2,192.168.42.254,1h".to_string(),
                "--dhcp-range=192.168.43.2,192.168.43.254,1h".to_string(),
            ]
        );
    }

    #[test]
    fn args_without_ranges() {
        assert_eq!(daemon_args::<&str>(&[]).len(), FIXED_ARGS.len());
    }

    #[test]
    fn missing_binary_fails_to_launch() {
        let launcher = ProcessLauncher::new("/nonexistent/netd-test-daemon");
        assert!(launcher.launch(&[]).is_err());
    }

    #[test]
    fn launch_write_terminate() {
        let launcher = ProcessLauncher::new("sleep");
        let mut daemon = launcher.launch(&["30".to_string()]).unwrap();
        assert!(daemon.pid() > 0);
        daemon.write_frame(b"update_ifaces|wlan0\0").unwrap();
        daemon.terminate().unwrap();
    }
}
