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

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::dnsproxy::iface::PidInterfaceMap;
use crate::dnsproxy::resolver::{
    AddrInfo, HOST_NOT_FOUND, HostEnt, Hints, ResolveError, Resolver,
};
use crate::dnsproxy::{self, WorkerContext};
use crate::drain::{self, DrainTrigger};
use crate::test_helpers::command::CommandConn;

/// A lookup as the resolver saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupCall {
    AddrInfo {
        host: Option<String>,
        service: Option<String>,
        hints: Option<Hints>,
        iface: Option<String>,
    },
    HostByName {
        name: Option<String>,
        family: i32,
        iface: Option<String>,
    },
    HostByAddr {
        addr: Vec<u8>,
        family: i32,
        iface: Option<String>,
    },
}

/// Answers every lookup with a canned result and records the call.
///
/// getaddrinfo returns no results and the host lookups HOST_NOT_FOUND until told
/// otherwise. Lookups can be slowed down or held, and the number running at once
/// is tracked.
pub struct FakeResolver {
    calls: Mutex<Vec<LookupCall>>,
    addrinfo: Mutex<Result<Vec<AddrInfo>, ResolveError>>,
    hostent: Mutex<Result<HostEnt, ResolveError>>,
    panic: AtomicBool,
    delay: Mutex<Duration>,
    held: (Mutex<bool>, Condvar),
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeResolver {
    pub fn new() -> Arc<FakeResolver> {
        Arc::new(FakeResolver {
            calls: Mutex::new(Vec::new()),
            addrinfo: Mutex::new(Ok(Vec::new())),
            hostent: Mutex::new(Err(ResolveError::Host(HOST_NOT_FOUND))),
            panic: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            held: (Mutex::new(false), Condvar::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Every lookup sleeps for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Lookups block once recorded until [FakeResolver::release] is called.
    pub fn hold(&self) {
        *self.held.0.lock().unwrap() = true;
    }

    pub fn release(&self) {
        *self.held.0.lock().unwrap() = false;
        self.held.1.notify_all();
    }

    /// Most lookups that were ever inside the resolver at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn set_addrinfo(&self, res: Result<Vec<AddrInfo>, ResolveError>) {
        *self.addrinfo.lock().unwrap() = res;
    }

    /// Result for both gethostbyname and gethostbyaddr.
    pub fn set_hostent(&self, res: Result<HostEnt, ResolveError>) {
        *self.hostent.lock().unwrap() = res;
    }

    pub fn panic_on_lookup(&self) {
        self.panic.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<LookupCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: LookupCall) {
        self.calls.lock().unwrap().push(call);
        if self.panic.load(Ordering::SeqCst) {
            panic!("injected lookup failure");
        }
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let mut held = self.held.0.lock().unwrap();
        while *held {
            held = self.held.1.wait(held).unwrap();
        }
        drop(held);
        std::thread::sleep(*self.delay.lock().unwrap());

        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Resolver for FakeResolver {
    fn getaddrinfo(
        &self,
        host: Option<&str>,
        service: Option<&str>,
        hints: Option<&Hints>,
        iface: Option<&str>,
    ) -> Result<Vec<AddrInfo>, ResolveError> {
        self.record(LookupCall::AddrInfo {
            host: host.map(str::to_string),
            service: service.map(str::to_string),
            hints: hints.copied(),
            iface: iface.map(str::to_string),
        });
        self.addrinfo.lock().unwrap().clone()
    }

    fn gethostbyname(
        &self,
        name: Option<&str>,
        family: i32,
        iface: Option<&str>,
    ) -> Result<HostEnt, ResolveError> {
        self.record(LookupCall::HostByName {
            name: name.map(str::to_string),
            family,
            iface: iface.map(str::to_string),
        });
        self.hostent.lock().unwrap().clone()
    }

    fn gethostbyaddr(
        &self,
        addr: &[u8],
        family: i32,
        iface: Option<&str>,
    ) -> Result<HostEnt, ResolveError> {
        self.record(LookupCall::HostByAddr {
            addr: addr.to_vec(),
            family,
            iface: iface.map(str::to_string),
        });
        self.hostent.lock().unwrap().clone()
    }
}

/// A running dnsproxyd listener on a socket in a temporary directory.
pub struct TestProxy {
    _dir: tempfile::TempDir,
    pub path: PathBuf,
    pub lookup: Arc<PidInterfaceMap>,
    pub drain: DrainTrigger,
}

impl TestProxy {
    pub async fn connect(&self) -> CommandConn {
        CommandConn::connect(&self.path).await
    }
}

pub async fn start_proxy(resolver: Arc<FakeResolver>) -> TestProxy {
    start_proxy_with_permits(resolver, 4).await
}

/// A proxy that runs at most `permits` lookups at once.
pub async fn start_proxy_with_permits(resolver: Arc<FakeResolver>, permits: usize) -> TestProxy {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dnsproxyd");
    let lookup = Arc::new(PidInterfaceMap::new());
    let ctx = WorkerContext::new(resolver, lookup.clone(), permits);
    let listener = dnsproxy::bind(&path, ctx).unwrap();
    let (drain, watcher) = drain::new();
    tokio::spawn(listener.run(watcher));
    TestProxy {
        _dir: dir,
        path,
        lookup,
        drain,
    }
}
