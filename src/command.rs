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

//! A small command socket framework: NUL terminated request lines, parsed into an
//! argument vector and dispatched by name to registered [Command]s.

use std::io;
use std::sync::Arc;

pub mod client;
pub mod listener;
pub mod response;

pub use client::SocketClient;
pub use listener::FrameworkListener;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unclosed quotes error")]
    UnclosedQuote,
    #[error("Received unsupported escape sequence")]
    BadEscape,
    #[error("Command too large for buffer")]
    TooLarge,
}

/// A handler registered under a fixed command name.
///
/// `run` must return quickly: long running work is handed to a spawned task that keeps
/// its own clone of `client`.
#[async_trait::async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    /// `argv[0]` is the command name itself.
    async fn run(&self, client: &Arc<SocketClient>, argv: &[String]) -> io::Result<()>;
}

/// Splits a request line into arguments.
///
/// Arguments are separated by single spaces. Double quotes group an argument that
/// contains spaces; inside an argument `\\` and `\"` are the only escapes.
pub fn parse_args(line: &str) -> Result<Vec<String>, ParseError> {
    let mut args = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(e @ ('\\' | '"')) => cur.push(e),
                _ => return Err(ParseError::BadEscape),
            },
            '"' => quoted = !quoted,
            ' ' if !quoted => {
                args.push(std::mem::take(&mut cur));
            }
            c => cur.push(c),
        }
    }
    if quoted {
        return Err(ParseError::UnclosedQuote);
    }
    if !cur.is_empty() || !args.is_empty() {
        args.push(cur);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("getaddrinfo example.com ^ -1 -1 -1 -1 ^ 42", &["getaddrinfo", "example.com", "^", "-1", "-1", "-1", "-1", "^", "42"]; "plain")]
    #[test_case(r#"1 tether dns set 100 "8.8.8.8""#, &["1", "tether", "dns", "set", "100", "8.8.8.8"]; "quoted")]
    #[test_case(r#"a "b c" d"#, &["a", "b c", "d"]; "quoted space")]
    #[test_case(r#"a b\"c"#, &["a", "b\"c"]; "escaped quote")]
    #[test_case(r#"a b\\c"#, &["a", "b\\c"]; "escaped backslash")]
    #[test_case("a  b", &["a", "", "b"]; "double space keeps empty argument")]
    #[test_case("", &[]; "empty")]
    fn parses(line: &str, want: &[&str]) {
        assert_eq!(parse_args(line).unwrap(), want);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse_args(r#"a "b"#), Err(ParseError::UnclosedQuote));
        assert_eq!(parse_args(r#"a \n"#), Err(ParseError::BadEscape));
    }
}
