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

//! A command socket client that understands the three response framings.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::command::SocketClient;
use crate::dnsproxy::resolver::{AddrInfo, HostEnt};
use crate::dnsproxy::wire;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

trait Io: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

pub struct CommandConn {
    io: Box<dyn Io>,
}

impl CommandConn {
    pub async fn connect(path: &Path) -> CommandConn {
        let stream = UnixStream::connect(path).await.unwrap();
        CommandConn {
            io: Box::new(stream),
        }
    }

    /// A [SocketClient] whose responses are read back through the returned connection.
    pub fn pair(with_seq: bool) -> (Arc<SocketClient>, CommandConn) {
        let (ours, theirs) = tokio::io::duplex(1 << 16);
        let client = SocketClient::new(theirs, with_seq);
        (client, CommandConn { io: Box::new(ours) })
    }

    /// Sends one request line; the NUL terminator is added.
    pub async fn send(&mut self, line: &str) {
        let mut buf = line.as_bytes().to_vec();
        buf.push(0);
        self.io.write_all(&buf).await.unwrap();
    }

    pub async fn read_exact(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0; n];
        tokio::time::timeout(READ_TIMEOUT, self.io.read_exact(&mut buf))
            .await
            .expect("timed out reading response")
            .unwrap();
        buf
    }

    /// Reads one NUL terminated text response, without the NUL.
    pub async fn read_text(&mut self) -> String {
        let mut out = Vec::new();
        loop {
            let b = self.read_exact(1).await[0];
            if b == 0 {
                break;
            }
            out.push(b);
        }
        String::from_utf8(out).unwrap()
    }

    /// Reads text responses until the peer closes.
    pub async fn read_all_text(&mut self) -> Vec<String> {
        let mut buf = Vec::new();
        tokio::time::timeout(READ_TIMEOUT, self.io.read_to_end(&mut buf))
            .await
            .expect("timed out reading responses")
            .unwrap();
        buf.split(|b| *b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8(s.to_vec()).unwrap())
            .collect()
    }

    /// Reads a bare response code: three digits and a NUL.
    pub async fn read_code(&mut self) -> u16 {
        let b = self.read_exact(4).await;
        assert_eq!(b[3], 0, "code is NUL terminated");
        std::str::from_utf8(&b[..3]).unwrap().parse().unwrap()
    }

    pub async fn read_u32(&mut self) -> u32 {
        let b = self.read_exact(4).await;
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    pub async fn read_i32(&mut self) -> i32 {
        self.read_u32().await as i32
    }

    /// Reads a length prefixed frame.
    pub async fn read_frame(&mut self) -> Vec<u8> {
        let len = self.read_u32().await as usize;
        self.read_exact(len).await
    }

    /// Reads a binary response: the code then one frame.
    pub async fn read_binary(&mut self) -> (u16, Vec<u8>) {
        let code = self.read_code().await;
        (code, self.read_frame().await)
    }

    /// Reads a host entry as it follows a `222` code.
    pub async fn read_hostent(&mut self) -> HostEnt {
        let mut raw = Vec::new();
        let push_frame = |raw: &mut Vec<u8>, f: &[u8]| {
            raw.extend_from_slice(&(f.len() as u32).to_be_bytes());
            raw.extend_from_slice(f);
        };
        let name = self.read_frame().await;
        push_frame(&mut raw, &name);
        loop {
            let alias = self.read_frame().await;
            push_frame(&mut raw, &alias);
            if alias.is_empty() {
                break;
            }
        }
        raw.extend_from_slice(&self.read_exact(8).await);
        loop {
            let addr = self.read_frame().await;
            push_frame(&mut raw, &addr);
            if addr.is_empty() {
                break;
            }
        }
        wire::decode_hostent(&mut raw.as_slice()).unwrap()
    }

    /// Reads getaddrinfo records as they follow a `222` code.
    pub async fn read_addrinfo_list(&mut self) -> Vec<AddrInfo> {
        let mut raw = Vec::new();
        loop {
            let header = self.read_frame().await;
            raw.extend_from_slice(&(header.len() as u32).to_be_bytes());
            raw.extend_from_slice(&header);
            if header.is_empty() {
                break;
            }
            for _ in 0..2 {
                let f = self.read_frame().await;
                raw.extend_from_slice(&(f.len() as u32).to_be_bytes());
                raw.extend_from_slice(&f);
            }
        }
        wire::decode_addrinfo_list(&mut raw.as_slice()).unwrap()
    }

    /// True once the peer has closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        let mut b = [0u8; 1];
        matches!(
            tokio::time::timeout(READ_TIMEOUT, self.io.read(&mut b)).await,
            Ok(Ok(0))
        )
    }
}
