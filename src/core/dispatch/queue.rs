// src/core/dispatch/queue.rs

//! A FIFO queue of pending messages for one host, plus a flag that lets the
//! dispatcher avoid spawning a second drain task while one is already
//! running for that host.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::ingress::HostMessage;

pub struct PerHostQueue {
    pending: Mutex<VecDeque<HostMessage>>,
    draining: AtomicBool,
}

impl PerHostQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        }
    }

    pub fn push(&self, message: HostMessage) {
        self.pending.lock().push_back(message);
    }

    pub fn pop(&self) -> Option<HostMessage> {
        self.pending.lock().pop_front()
    }

    /// Atomically claims the right to drain this queue. Returns `false` if
    /// another task already holds it.
    pub fn begin_draining(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_draining(&self) {
        self.draining.store(false, Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl Default for PerHostQueue {
    fn default() -> Self {
        Self::new()
    }
}
