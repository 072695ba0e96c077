//! Connector backed by in-memory streams, for tests.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::channel::Connector;

/// Hands out streams queued with [`MockConnector::attach`], one per connect.
///
/// Clones share the same queue, so a test keeps one clone to play the peer.
#[derive(Debug)]
pub struct MockConnector<S> {
    pending: Arc<Mutex<VecDeque<S>>>,
    attempts: Arc<AtomicUsize>,
}

impl<S> MockConnector<S> {
    /// A connector with no peer attached.
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(VecDeque::new())),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a stream for the next connect attempt.
    pub fn attach(&self, stream: S) {
        self.pending.lock().push_back(stream);
    }

    /// Number of connect attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<S> Clone for MockConnector<S> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
            attempts: Arc::clone(&self.attempts),
        }
    }
}

impl<S> Default for MockConnector<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Connector for MockConnector<S> {
    type Stream = S;

    fn connect(&mut self) -> io::Result<Option<S>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(self.pending.lock().pop_front())
    }
}
