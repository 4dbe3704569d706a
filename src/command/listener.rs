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
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{Instrument, debug, info, trace, warn};

use super::response::COMMAND_SYNTAX_ERROR;
use super::{Command, ParseError, SocketClient, parse_args};
use crate::drain::DrainWatcher;

/// Longest accepted request line, excluding the NUL terminator.
pub const MAX_COMMAND_SIZE: usize = 4096;

type Commands = HashMap<&'static str, Arc<dyn Command>>;

/// Accepts connections on a unix socket and dispatches their request lines.
pub struct FrameworkListener {
    name: &'static str,
    path: PathBuf,
    listener: UnixListener,
    with_seq: bool,
    commands: Commands,
}

impl FrameworkListener {
    /// Binds `path`, replacing a stale socket file if one is left over.
    ///
    /// With `with_seq`, every request starts with a sequence number that is echoed in
    /// text responses.
    pub fn bind(name: &'static str, path: &Path, with_seq: bool) -> io::Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(component = name, "removed stale socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let listener = UnixListener::bind(path)?;
        info!(component = name, path = %path.display(), "listening for commands");
        Ok(FrameworkListener {
            name,
            path: path.to_path_buf(),
            listener,
            with_seq,
            commands: HashMap::new(),
        })
    }

    pub fn register(&mut self, cmd: Arc<dyn Command>) {
        self.commands.insert(cmd.name(), cmd);
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn address(&self) -> &Path {
        &self.path
    }

    /// Serves connections until a drain is signaled. Connections already accepted keep
    /// running on their own tasks.
    pub async fn run(self, drain: DrainWatcher) {
        let FrameworkListener {
            name,
            path,
            listener,
            with_seq,
            commands,
        } = self;
        let commands = Arc::new(commands);

        let blocker = loop {
            tokio::select! {
                biased;
                blocker = drain.clone().wait_for_drain() => break blocker,
                res = listener.accept() => match res {
                    Ok((stream, _)) => {
                        trace!(component = name, "accepted connection");
                        let commands = commands.clone();
                        tokio::spawn(serve(name, stream, commands, with_seq).in_current_span());
                    }
                    Err(e) => {
                        warn!(component = name, "failed to accept connection: {e}");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        };

        drop(listener);
        if let Err(e) = std::fs::remove_file(&path) {
            debug!(component = name, "failed to remove {}: {e}", path.display());
        }
        info!(component = name, "listener stopped");
        drop(blocker);
    }
}

async fn serve(name: &'static str, stream: UnixStream, commands: Arc<Commands>, with_seq: bool) {
    let (read, write) = stream.into_split();
    let client = SocketClient::new(write, with_seq);
    let mut reader = BufReader::new(read);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let res = (&mut reader)
            .take(MAX_COMMAND_SIZE as u64 + 1)
            .read_until(0, &mut buf)
            .await;
        match res {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(component = name, "read failed: {e}");
                break;
            }
        }
        if buf.last() != Some(&0) {
            if buf.len() > MAX_COMMAND_SIZE {
                let _ = client
                    .send_msg(COMMAND_SYNTAX_ERROR, &ParseError::TooLarge.to_string(), None)
                    .await;
            }
            // oversized, or the peer hung up mid-command
            break;
        }
        buf.pop();
        let line = String::from_utf8_lossy(&buf);
        if let Err(e) = dispatch(name, &client, &commands, with_seq, &line).await {
            debug!(component = name, "failed to write response: {e}");
            break;
        }
    }
    trace!(component = name, "connection closed");
}

async fn dispatch(
    name: &'static str,
    client: &Arc<SocketClient>,
    commands: &Commands,
    with_seq: bool,
    line: &str,
) -> io::Result<()> {
    let mut argv = match parse_args(line) {
        Ok(argv) => argv,
        Err(e) => return client.send_msg(COMMAND_SYNTAX_ERROR, &e.to_string(), None).await,
    };
    if with_seq {
        match argv.first().and_then(|s| s.parse::<i32>().ok()) {
            Some(seq) => {
                client.set_cmd_num(seq);
                argv.remove(0);
            }
            None => {
                return client
                    .send_msg(COMMAND_SYNTAX_ERROR, "Invalid sequence number", None)
                    .await;
            }
        }
    }
    let cmd = argv.first().and_then(|n| commands.get(n.as_str()));
    match cmd {
        Some(cmd) => {
            trace!(component = name, ?argv, "dispatching");
            cmd.run(client, &argv).await
        }
        None => {
            client
                .send_msg(COMMAND_SYNTAX_ERROR, "Command not recognized", None)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::response::COMMAND_OKAY;
    use crate::drain::{self, DrainMode};
    use crate::test_helpers::command::CommandConn;

    struct Echo;

    #[async_trait::async_trait]
    impl Command for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn run(&self, client: &Arc<SocketClient>, argv: &[String]) -> io::Result<()> {
            client.send_msg(COMMAND_OKAY, &argv[1..].join(" "), None).await
        }
    }

    async fn start(with_seq: bool) -> (tempfile::TempDir, PathBuf, drain::DrainTrigger) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let mut l = FrameworkListener::bind("test", &path, with_seq).unwrap();
        l.register(Arc::new(Echo));
        let (trigger, watcher) = drain::new();
        tokio::spawn(l.run(watcher));
        (dir, path, trigger)
    }

    #[tokio::test]
    async fn dispatches_with_seq() {
        let (_dir, path, trigger) = start(true).await;
        let mut conn = CommandConn::connect(&path).await;

        conn.send("5 echo hello \"big world\"").await;
        assert_eq!(conn.read_text().await, "200 5 hello big world");

        conn.send("6 nope").await;
        assert_eq!(conn.read_text().await, "500 6 Command not recognized");

        conn.send("echo hi").await;
        assert_eq!(conn.read_text().await, "500 6 Invalid sequence number");

        conn.send("7 echo \"open").await;
        assert_eq!(conn.read_text().await, "500 6 Unclosed quotes error");

        trigger.start_drain_and_wait(DrainMode::Graceful).await;
        assert!(!path.exists(), "socket file is removed on shutdown");
    }

    #[tokio::test]
    async fn dispatches_without_seq() {
        let (_dir, path, _trigger) = start(false).await;
        let mut conn = CommandConn::connect(&path).await;
        conn.send("echo a b").await;
        assert_eq!(conn.read_text().await, "200 a b");
    }

    #[tokio::test]
    async fn oversized_command_is_rejected() {
        let (_dir, path, _trigger) = start(false).await;
        let mut conn = CommandConn::connect(&path).await;
        conn.send(&"x".repeat(MAX_COMMAND_SIZE + 10)).await;
        assert_eq!(conn.read_text().await, "500 Command too large for buffer");
        assert!(conn.is_closed().await);
    }

    #[tokio::test]
    async fn replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        std::fs::write(&path, "").unwrap();
        assert!(FrameworkListener::bind("test", &path, false).is_ok());
    }
}
