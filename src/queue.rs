use std::sync::Mutex;

use crate::request::Request;

/// Thread-safe staging area for requests submitted from outside the loop
/// thread.
///
/// Producers append under the mutex and then fire the reactor wakeup (the
/// wakeup is the caller's job, keeping the queue itself reentrancy-safe).
/// The loop thread drains by swapping the whole vector out, so the lock is
/// held for O(1) on the hot path. FIFO, no priority.
pub(crate) struct PendingQueue {
    inner: Mutex<Vec<Request>>,
}

impl PendingQueue {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Append a request. Any thread.
    pub(crate) fn push(&self, request: Request) {
        self.lock().push(request);
    }

    /// Number of requests currently staged. Any thread; snapshot only.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Swap out everything staged so far. Loop thread only.
    pub(crate) fn drain(&self) -> Vec<Request> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Request>> {
        // A producer panicking mid-push leaves at worst a missing tail
        // element; keep draining rather than poisoning the whole loop.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_fifo_order() {
        let queue = PendingQueue::with_capacity(4);
        queue.push(Request::new("http://a/"));
        queue.push(Request::new("http://b/"));
        queue.push(Request::new("http://c/"));

        let drained = queue.drain();
        let urls: Vec<&str> = drained.iter().map(|r| r.url()).collect();
        assert_eq!(urls, ["http://a/", "http://b/", "http://c/"]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn drain_on_empty_returns_empty() {
        let queue = PendingQueue::with_capacity(4);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn push_from_many_threads() {
        use std::sync::Arc;

        let queue = Arc::new(PendingQueue::with_capacity(0));
        let mut handles = Vec::new();
        for t in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    queue.push(Request::new(format!("http://t{t}/{i}")));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.drain().len(), 400);
    }
}
