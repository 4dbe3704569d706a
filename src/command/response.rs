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

//! Response codes and the three response framings.
//!
//! * text: `"<code> [<cmd num> ]<message>\0"`
//! * code only: three ASCII digits and a NUL
//! * binary: three ASCII digits, a NUL, a big-endian u32 length, then the payload

use bytes::{BufMut, BytesMut};

pub type ResponseCode = u16;

// 100 series: partial results, more lines follow.
pub const TETHER_INTERFACE_LIST_RESULT: ResponseCode = 111;
pub const TETHER_DNS_FWD_TGT_LIST_RESULT: ResponseCode = 112;

// 200 series: the requested action completed.
pub const COMMAND_OKAY: ResponseCode = 200;
pub const TETHER_STATUS_RESULT: ResponseCode = 210;
pub const IP_FWD_STATUS_RESULT: ResponseCode = 211;
pub const DNS_PROXY_QUERY_RESULT: ResponseCode = 222;

// 400 series: the command was accepted but the action failed.
pub const OPERATION_FAILED: ResponseCode = 400;
pub const DNS_PROXY_OPERATION_FAILED: ResponseCode = 401;

// 500 series: the command was not accepted.
pub const COMMAND_SYNTAX_ERROR: ResponseCode = 500;
pub const COMMAND_PARAMETER_ERROR: ResponseCode = 501;

/// Size of the header that precedes every code-only and binary response.
pub const CODE_LEN: usize = 4;

fn put_code(buf: &mut BytesMut, code: ResponseCode) {
    buf.put_slice(format!("{:03}", code % 1000).as_bytes());
    buf.put_u8(0);
}

pub fn code_only(code: ResponseCode) -> BytesMut {
    let mut buf = BytesMut::with_capacity(CODE_LEN);
    put_code(&mut buf, code);
    buf
}

pub fn binary(code: ResponseCode, data: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(CODE_LEN + 4 + data.len());
    put_code(&mut buf, code);
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
    buf
}

pub fn text(code: ResponseCode, cmd_num: Option<i32>, msg: &str) -> BytesMut {
    let line = match cmd_num {
        Some(n) => format!("{:03} {n} {msg}", code % 1000),
        None => format!("{:03} {msg}", code % 1000),
    };
    let mut buf = BytesMut::with_capacity(line.len() + 1);
    buf.put_slice(line.as_bytes());
    buf.put_u8(0);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framings() {
        assert_eq!(&code_only(DNS_PROXY_QUERY_RESULT)[..], b"222\0");
        assert_eq!(
            &binary(DNS_PROXY_OPERATION_FAILED, &[1, 2])[..],
            b"401\0\x00\x00\x00\x02\x01\x02"
        );
        assert_eq!(&text(COMMAND_OKAY, Some(7), "ok")[..], b"200 7 ok\0");
        assert_eq!(&text(COMMAND_PARAMETER_ERROR, None, "bad")[..], b"501 bad\0");
    }
}
