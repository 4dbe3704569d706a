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
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use nix::errno::Errno;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::response::{self, ResponseCode};

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// The write side of one command socket connection.
///
/// Shared as `Arc<SocketClient>`: the dispatch loop holds one reference and every
/// in-flight worker holds another, so the socket stays open until the last response
/// is written. Each `send_*` call is a single locked write, so concurrent responses
/// never interleave.
pub struct SocketClient {
    writer: Mutex<Writer>,
    use_cmd_num: bool,
    cmd_num: AtomicI32,
}

impl SocketClient {
    pub fn new<W>(writer: W, use_cmd_num: bool) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(SocketClient {
            writer: Mutex::new(Box::new(writer)),
            use_cmd_num,
            cmd_num: AtomicI32::new(0),
        })
    }

    /// Sets the sequence number echoed in text responses.
    pub fn set_cmd_num(&self, n: i32) {
        self.cmd_num.store(n, Ordering::Relaxed);
    }

    pub fn cmd_num(&self) -> i32 {
        self.cmd_num.load(Ordering::Relaxed)
    }

    /// Sends a text response, with the description of `errno` appended if given.
    pub async fn send_msg(
        &self,
        code: ResponseCode,
        msg: &str,
        errno: Option<Errno>,
    ) -> io::Result<()> {
        let cmd_num = self.use_cmd_num.then(|| self.cmd_num());
        let buf = match errno {
            Some(e) => response::text(code, cmd_num, &format!("{msg} ({})", e.desc())),
            None => response::text(code, cmd_num, msg),
        };
        self.send_data(&buf).await
    }

    pub async fn send_code(&self, code: ResponseCode) -> io::Result<()> {
        self.send_data(&response::code_only(code)).await
    }

    pub async fn send_binary_msg(&self, code: ResponseCode, data: &[u8]) -> io::Result<()> {
        self.send_data(&response::binary(code, data)).await
    }

    /// Writes pre-framed bytes in one go.
    pub async fn send_data(&self, data: &[u8]) -> io::Result<()> {
        let mut w = self.writer.lock().await;
        w.write_all(data).await?;
        w.flush().await
    }
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketClient")
            .field("use_cmd_num", &self.use_cmd_num)
            .field("cmd_num", &self.cmd_num())
            .finish_non_exhaustive()
    }
}
