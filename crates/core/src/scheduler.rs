//! Priority dispatch queue
//!
//! Submitted requests wait in a stable priority queue (highest priority
//! first, FIFO among equals) until the dispatcher hands them to the
//! pipeline. At most `max_concurrent` queued requests run at once; a new
//! limit takes effect the next time the dispatcher is spawned. Requests
//! submitted before a dispatcher runs wait in the queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use netweave_common::collections::StablePriorityQueue;
use netweave_domain::{NetworkError, Priority, Request, RequestError, RequestResult, Response};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pipeline::RequestPipeline;

struct QueuedRequest {
    request: Request,
    enqueued_at: Instant,
    responder: oneshot::Sender<RequestResult<Response>>,
    cancel: CancellationToken,
}

impl QueuedRequest {
    fn refuse(self, error: NetworkError) {
        let failure = RequestError::new(self.request.method(), self.request.endpoint(), 0, error);
        let _ = self.responder.send(Err(failure));
    }
}

pub struct PriorityScheduler {
    pipeline: Arc<RequestPipeline>,
    queue: Mutex<StablePriorityQueue<Priority, QueuedRequest>>,
    notify: Notify,
    max_concurrent: AtomicUsize,
}

impl PriorityScheduler {
    pub fn new(pipeline: Arc<RequestPipeline>, max_concurrent: usize) -> Self {
        Self {
            pipeline,
            queue: Mutex::new(StablePriorityQueue::new()),
            notify: Notify::new(),
            max_concurrent: AtomicUsize::new(max_concurrent.max(1)),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::Relaxed)
    }

    pub fn set_max_concurrent(&self, max_concurrent: usize) {
        self.max_concurrent.store(max_concurrent.max(1), Ordering::Relaxed);
    }

    /// Requests waiting for dispatch
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Queue a request; the receiver resolves once it has run
    pub fn enqueue(&self, request: Request, cancel: CancellationToken) -> oneshot::Receiver<RequestResult<Response>> {
        let (responder, receiver) = oneshot::channel();
        let priority = request.priority();
        let queued = QueuedRequest { request, enqueued_at: Instant::now(), responder, cancel };
        self.queue.lock().push(priority, queued);
        self.notify.notify_one();
        receiver
    }

    /// Queue a request and wait for its result
    pub async fn submit(&self, request: Request, cancel: CancellationToken) -> RequestResult<Response> {
        let (method, endpoint) = (request.method(), request.endpoint().to_string());
        self.enqueue(request, cancel).await.unwrap_or_else(|_| {
            Err(RequestError::new(
                method,
                endpoint,
                0,
                NetworkError::Internal("scheduler dropped the request".into()),
            ))
        })
    }

    /// Next request someone is still waiting for
    fn pop_live(&self) -> Option<QueuedRequest> {
        let mut queue = self.queue.lock();
        while let Some(item) = queue.pop() {
            if item.responder.is_closed() {
                continue;
            }
            if item.cancel.is_cancelled() {
                item.refuse(NetworkError::Cancelled);
                continue;
            }
            return Some(item);
        }
        None
    }

    /// Drain the queue until `shutdown` fires. Requests still queued then
    /// stay queued for the next dispatcher.
    pub fn spawn_dispatcher(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let limit = scheduler.max_concurrent();
        tokio::spawn(async move {
            let slots = Arc::new(Semaphore::new(limit));
            info!(max_concurrent = limit, "request dispatcher started");

            'dispatch: loop {
                let slot = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    slot = Arc::clone(&slots).acquire_owned() => match slot {
                        Ok(slot) => slot,
                        Err(_) => break,
                    },
                };

                let item = loop {
                    if let Some(item) = scheduler.pop_live() {
                        break item;
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break 'dispatch,
                        _ = scheduler.notify.notified() => {}
                    }
                };

                let pipeline = Arc::clone(&scheduler.pipeline);
                tokio::spawn(async move {
                    let QueuedRequest { request, enqueued_at, responder, cancel } = item;
                    debug!(
                        priority = %request.priority(),
                        waited_ms = enqueued_at.elapsed().as_millis() as u64,
                        "dispatching queued request"
                    );
                    let result = pipeline.execute(request, &cancel).await;
                    let _ = responder.send(result);
                    drop(slot);
                });
            }

            info!(pending = scheduler.pending(), "request dispatcher stopped");
        })
    }

    /// Fail every queued request with `Cancelled`
    pub fn cancel_pending(&self) -> usize {
        let drained = self.queue.lock().drain_ordered();
        let count = drained.len();
        for item in drained {
            item.refuse(NetworkError::Cancelled);
        }
        count
    }
}

impl std::fmt::Debug for PriorityScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityScheduler")
            .field("pending", &self.pending())
            .field("max_concurrent", &self.max_concurrent())
            .finish()
    }
}
