//! Serialized, delay-spaced execution of stream publications.
//!
//! A new stream and its side-channel metadata reach the receiver as two
//! independently timed events. Publishing two streams back-to-back lets the
//! receiver pair metadata with the wrong stream, so publications run one at a
//! time with a fixed pause after each.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::trace;

/// A deferred unit of work. Publishing and waiting are both tasks, so the
/// queue is a flat FIFO.
pub type StreamTask = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

pub struct StreamQueue {
    tasks: Mutex<VecDeque<StreamTask>>,
    processing: AtomicBool,
    delay: Duration,
}

impl StreamQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            processing: AtomicBool::new(false),
            delay,
        }
    }

    /// Queue `publish` followed by the spacing delay, then make sure a drainer
    /// is running. Returns immediately.
    pub fn enqueue_publication(self: &Arc<Self>, publish: StreamTask) {
        let delay = self.delay;
        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.push_back(publish);
            tasks.push_back(Box::new(move || Box::pin(tokio::time::sleep(delay))));
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.drain().await });
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Drop everything not yet started. The task in flight runs to completion.
    pub fn clear(&self) {
        self.tasks.lock().unwrap().clear();
    }

    /// Run queued tasks strictly in order, one at a time. Returns at once if
    /// another drainer is active.
    pub async fn drain(&self) {
        loop {
            if self
                .processing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            loop {
                let next = self.tasks.lock().unwrap().pop_front();
                match next {
                    Some(task) => task().await,
                    None => break,
                }
            }

            self.processing.store(false, Ordering::Release);

            // A task may have been queued between the empty check and the
            // flag reset; its drainer saw `processing` still set and left.
            if self.tasks.lock().unwrap().is_empty() {
                return;
            }
            trace!("Stream queue refilled while finishing, draining again");
        }
    }
}
