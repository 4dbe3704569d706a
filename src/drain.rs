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

use tokio::sync::{mpsc, watch};

/// Constructs a new pair for draining.
/// * DrainTrigger starts a drain and waits for it to complete.
/// * DrainWatcher is held by every component that takes part in the drain. It can be
///   cloned; the drain completes once all watchers (and the blockers they hand out) are dropped.
pub fn new() -> (DrainTrigger, DrainWatcher) {
    let (signal_tx, signal_rx) = watch::channel(None);
    let (released_tx, released_rx) = mpsc::channel(1);
    (
        DrainTrigger {
            signal_tx,
            released_rx,
        },
        DrainWatcher {
            signal_rx,
            released_tx,
        },
    )
}

enum Never {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    Immediate,
    Graceful,
}

pub struct DrainTrigger {
    signal_tx: watch::Sender<Option<DrainMode>>,
    released_rx: mpsc::Receiver<Never>,
}

impl DrainTrigger {
    /// Signals every watcher and waits until all of them are released.
    pub async fn start_drain_and_wait(mut self, mode: DrainMode) {
        let _ = self.signal_tx.send(Some(mode));
        // recv only returns once every sender is gone
        if let Some(never) = self.released_rx.recv().await {
            match never {}
        }
    }
}

#[derive(Clone)]
pub struct DrainWatcher {
    signal_rx: watch::Receiver<Option<DrainMode>>,
    released_tx: mpsc::Sender<Never>,
}

impl DrainWatcher {
    /// Completes once a drain is started. The returned blocker holds the drain open
    /// until it is dropped.
    pub async fn wait_for_drain(mut self) -> DrainBlocker {
        let mode = match self.signal_rx.wait_for(Option::is_some).await {
            Ok(mode) => (*mode).unwrap_or(DrainMode::Immediate),
            // trigger dropped without signaling
            Err(_) => DrainMode::Immediate,
        };
        DrainBlocker(self.released_tx, mode)
    }
}

#[must_use = "DrainBlocker must be held until cleanup is done"]
pub struct DrainBlocker(#[allow(dead_code)] mpsc::Sender<Never>, DrainMode);

impl DrainBlocker {
    pub fn mode(&self) -> DrainMode {
        self.1
    }
}

impl std::fmt::Debug for DrainTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainTrigger").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for DrainWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainWatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn drain_waits_for_blockers() {
        let (trigger, watcher) = new();
        let (done_tx, mut done_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let blocker = watcher.wait_for_drain().await;
            assert_eq!(blocker.mode(), DrainMode::Graceful);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = done_tx.send(());
            drop(blocker);
        });
        trigger.start_drain_and_wait(DrainMode::Graceful).await;
        assert!(done_rx.try_recv().is_ok());
    }
}
