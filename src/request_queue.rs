//! A [RequestQueue] drives asynchronous loads strictly one at a time.
//!
//! The queue is an ordered list of pending requests; position encodes priority. Each
//! [update](RequestQueue::update) polls the head: once it reports ready it is dequeued and the
//! next node starts. Nothing behind the head runs until everything ahead of it has completed,
//! except when [raise_priority](RequestQueue::raise_priority) reseats a request at the front.

use std::collections::VecDeque;

use tracing::trace;

use crate::Request;

struct Node<R> {
    key: String,
    request: R,
}

/// Strictly sequential, priority-reorderable scheduling for [Request]s.
pub struct RequestQueue<R> {
    queue: VecDeque<Node<R>>,
}

impl<R: Request> RequestQueue<R> {
    pub fn new() -> RequestQueue<R> {
        RequestQueue {
            queue: VecDeque::new(),
        }
    }

    /// Append a request. It will not start until it reaches the head of the queue during an
    /// `update`.
    pub fn enqueue(&mut self, key: impl Into<String>, request: R) {
        self.queue.push_back(Node {
            key: key.into(),
            request,
        });
    }

    /// Drive the head request one step, returning it if this tick saw it complete.
    ///
    /// The head's `start_request` is called every tick until it reports ready, covering both the
    /// first activation and re-polls while in flight.
    pub fn update(&mut self) -> Option<(String, R)> {
        if self.queue.front()?.request.is_request_ready() {
            let done = self.queue.pop_front()?;
            if let Some(next) = self.queue.front_mut() {
                trace!(key = %next.key, "starting next queued request");
                next.request.start_request();
            }
            Some((done.key, done.request))
        } else {
            if let Some(head) = self.queue.front_mut() {
                head.request.start_request();
            }
            None
        }
    }

    /// Move the first request matching `key` to the front of the queue. The displaced head is
    /// not stopped here; the next `update` polls and starts the new head.
    pub fn raise_priority(&mut self, key: &str) {
        if let Some(pos) = self.queue.iter().position(|node| node.key == key) {
            if pos != 0 {
                if let Some(node) = self.queue.remove(pos) {
                    self.queue.push_front(node);
                }
            }
        }
    }

    /// Drop every queued request without signaling them. Anything already in flight keeps
    /// running on the collaborator's side.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<R: Request> Default for RequestQueue<R> {
    fn default() -> RequestQueue<R> {
        RequestQueue::new()
    }
}
