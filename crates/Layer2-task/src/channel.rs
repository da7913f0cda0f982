//! Single-use handoff between a worker and its manager
//!
//! - First write wins; later writes are dropped and reported as `false`.
//! - The worker side marks itself gone through [`Producer`], so the manager
//!   can tell "nothing yet" from "nothing ever".
//! - Cancellation is just another write, racing the worker's frame.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Item carried by the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Encoded `Envelope` written by the worker
    Frame(Vec<u8>),
    /// Injected by `Task::cancel`
    Cancelled,
}

/// Result of waiting on the channel
#[derive(Debug, PartialEq, Eq)]
pub enum Recv {
    Signal(Signal),
    /// Deadline elapsed with nothing written
    Empty,
    /// Worker side is gone and nothing was written
    Disconnected,
}

#[derive(Debug, Default)]
struct Slot {
    item: Option<Signal>,
    delivered: bool,
    producer_gone: bool,
}

#[derive(Debug, Default)]
pub struct Channel {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write an item. Returns `false` if something was already written.
    pub fn put(&self, signal: Signal) -> bool {
        {
            let mut slot = self.slot.lock();
            if slot.item.is_some() || slot.delivered {
                return false;
            }
            slot.item = Some(signal);
        }
        self.notify.notify_one();
        true
    }

    /// Whether an item has been written (delivered or not)
    pub fn is_written(&self) -> bool {
        let slot = self.slot.lock();
        slot.item.is_some() || slot.delivered
    }

    fn close_producer(&self) {
        self.slot.lock().producer_gone = true;
        self.notify.notify_one();
    }

    /// Wait for the item, up to `timeout` (`None` waits forever).
    ///
    /// A pending item is returned even if the producer is already gone.
    /// After `Disconnected` the channel rejects all writes.
    pub async fn recv(&self, timeout: Option<Duration>) -> Recv {
        let wait = async {
            loop {
                {
                    let mut slot = self.slot.lock();
                    if let Some(signal) = slot.item.take() {
                        slot.delivered = true;
                        return Recv::Signal(signal);
                    }
                    if slot.producer_gone {
                        // closed for good: a late cancel must not look accepted
                        slot.delivered = true;
                        return Recv::Disconnected;
                    }
                }
                // notify_one keeps a permit, so a write between the check
                // and this await is not lost
                self.notify.notified().await;
            }
        };

        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .unwrap_or(Recv::Empty),
            None => wait.await,
        }
    }
}

/// Worker-side guard; marks the producer gone when dropped.
pub struct Producer {
    channel: Arc<Channel>,
}

impl Producer {
    pub fn new(channel: Arc<Channel>) -> Self {
        Self { channel }
    }

    pub fn put(&self, signal: Signal) -> bool {
        self.channel.put(signal)
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.channel.close_producer();
    }
}
