//! vidlink-dispatch: cross-thread event marshaling
//!
//! Callbacks from the peer connection arrive on arbitrary background threads.
//! Work that must touch consumer-owned state is wrapped in a deferred action
//! and pushed to an unbounded queue; the consumer thread (the one that built
//! the queue) runs everything queued once per update tick.
//!
//! ```text
//! callback thread A ─┐
//! callback thread B ─┼─► ActionSender ──► unbounded mpsc ──► ActionPump::drain_once (consumer)
//! consumer itself  ──┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use vidlink_dispatch::main_thread_queue;
//!
//! let (sender, mut pump) = main_thread_queue();
//! let worker = std::thread::spawn(move || {
//!     sender.enqueue(|| println!("runs on the consumer thread"));
//! });
//! worker.join().unwrap();
//!
//! let report = pump.drain_once().unwrap();
//! assert_eq!(report.executed, 1);
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, ThreadId};

use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, error};
use vidlink_core::DispatchError;

/// Zero-argument unit of work queued for the consumer thread.
pub type DeferredAction = Box<dyn FnOnce() + Send + 'static>;

/// Creates an action queue whose consumer is the calling thread.
pub fn main_thread_queue() -> (ActionSender, ActionPump) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sender = ActionSender { tx };
    let pump = ActionPump {
        rx,
        sender: sender.clone(),
        consumer: thread::current().id(),
        panics_total: 0,
    };
    (sender, pump)
}

// MARK: - ActionSender

/// Producer handle. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct ActionSender {
    tx: mpsc::UnboundedSender<DeferredAction>,
}

impl ActionSender {
    /// Appends an action. Never blocks.
    ///
    /// If the pump is gone the action is dropped unexecuted; producers are
    /// never told about it.
    pub fn enqueue<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(action)).is_err() {
            debug!("Action queue closed, dropping deferred action");
        }
    }

    /// `true` once the consuming [`ActionPump`] has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for ActionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

// MARK: - DrainReport

/// Outcome of one [`ActionPump::drain_once`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Actions taken off the queue (including those that panicked).
    pub executed: usize,
    /// Actions that panicked while running.
    pub panicked: usize,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.executed == 0
    }
}

// MARK: - ActionPump

/// Consumer half. Only the thread that created the queue may drain it.
pub struct ActionPump {
    rx: mpsc::UnboundedReceiver<DeferredAction>,
    // Keeps the channel open even when every external sender is gone, so
    // components can be re-created without rebuilding the pump.
    sender: ActionSender,
    consumer: ThreadId,
    panics_total: u64,
}

impl ActionPump {
    /// Runs queued actions, oldest first, until the queue is observed empty.
    ///
    /// Actions enqueued while draining (including by a running action) are
    /// picked up by the same call. A panicking action is logged and counted;
    /// the rest of the queue still runs.
    pub fn drain_once(&mut self) -> Result<DrainReport, DispatchError> {
        let actual = thread::current().id();
        if actual != self.consumer {
            return Err(DispatchError::WrongThread { expected: self.consumer, actual });
        }

        let mut report = DrainReport::default();
        loop {
            let action = match self.rx.try_recv() {
                Ok(action) => action,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            report.executed += 1;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(action)) {
                report.panicked += 1;
                self.panics_total += 1;
                error!(
                    "Deferred action panicked: {} (total panics: {})",
                    panic_message(payload.as_ref()),
                    self.panics_total
                );
            }
        }

        if !report.is_empty() {
            debug!(
                "Drained {} action(s), {} panicked",
                report.executed, report.panicked
            );
        }
        Ok(report)
    }

    /// Another producer handle for this queue.
    pub fn sender(&self) -> ActionSender {
        self.sender.clone()
    }

    /// Number of actions waiting; a snapshot, producers may race it.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn is_consumer_thread(&self) -> bool {
        thread::current().id() == self.consumer
    }

    /// Panics caught across the pump's lifetime.
    pub fn panics_total(&self) -> u64 {
        self.panics_total
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
