//! Message routing: per-id queues, handler threads, and quiescence waits.

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use rand::Rng;

use crate::worker::{self, Worker, WorkerHandle, WorkerShared};

/// Arbitrary identifier for a message stream; ids need not be contiguous.
pub type MessageId = usize;

/// Pop policy of one handler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DrainOrder {
    /// Oldest message first.
    #[default]
    Fifo,
    /// Newest message first.
    Lifo,
    /// Uniformly random message. Useful where path dependence hurts, e.g.
    /// fill-style algorithms; linear-time removal, so keep queues short.
    Random,
}

/// Whether a logged message was just enqueued or is about to be handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Observes every send and every delivery for one message id.
pub type MessageLogger<M> = Box<dyn Fn(MessageId, &M, Direction) + Send>;

/// Everything that defines one handler: the callback, failure and exit
/// hooks, the thread name, and the pop policy.
pub struct HandlerConfig<M> {
    on_message: Box<dyn FnMut(M) + Send>,
    on_panic: Option<Box<dyn FnMut(&str) + Send>>,
    on_exit: Option<Box<dyn FnMut() + Send>>,
    thread_name: String,
    order: DrainOrder,
}

impl<M> HandlerConfig<M> {
    pub fn new(on_message: impl FnMut(M) + Send + 'static) -> Self {
        Self {
            on_message: Box::new(on_message),
            on_panic: None,
            on_exit: None,
            thread_name: "handler".to_string(),
            order: DrainOrder::Fifo,
        }
    }

    /// Route panics escaping `on_message` to `on_panic` (as the panic
    /// message) instead of the log.
    pub fn on_panic(mut self, on_panic: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_panic = Some(Box::new(on_panic));
        self
    }

    /// Run `on_exit` on the handler thread right before it terminates.
    pub fn on_exit(mut self, on_exit: impl FnMut() + Send + 'static) -> Self {
        self.on_exit = Some(Box::new(on_exit));
        self
    }

    /// Base name for the handler thread; the message id is appended.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn order(mut self, order: DrainOrder) -> Self {
        self.order = order;
        self
    }
}

struct QueueState<M> {
    messages: VecDeque<M>,
    /// Handler invocations whose payload is already dequeued but whose
    /// `on_message` has not finished.
    busy: usize,
}

struct MessageQueue<M> {
    shared: Arc<WorkerShared<QueueState<M>>>,
    /// Broadcast when the queue is empty and no invocation is in flight.
    /// Paired with the mutex inside `shared`.
    drained: Condvar,
    logger: Mutex<Option<MessageLogger<M>>>,
}

impl<M> MessageQueue<M> {
    fn new() -> Self {
        Self {
            shared: Arc::new(WorkerShared::new(QueueState {
                messages: VecDeque::new(),
                busy: 0,
            })),
            drained: Condvar::new(),
            logger: Mutex::new(None),
        }
    }
}

/// Per-message-id queues with any number of handler threads each.
///
/// Wrap it in an `Arc` when handlers need to send messages themselves, and
/// break the resulting cycle with [`dispose`](Self::dispose) when done.
pub struct MessageManager<M: Send + 'static> {
    // declared before `queues` so handlers join before queues go away
    handlers: Mutex<BTreeMap<MessageId, Vec<WorkerHandle<QueueState<M>>>>>,
    queues: Mutex<BTreeMap<MessageId, Arc<MessageQueue<M>>>>,
}

impl<M: Send + 'static> MessageManager<M> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(BTreeMap::new()),
            queues: Mutex::new(BTreeMap::new()),
        }
    }

    fn queue(&self, id: MessageId) -> Arc<MessageQueue<M>> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            queues
                .entry(id)
                .or_insert_with(|| Arc::new(MessageQueue::new())),
        )
    }

    /// Enqueue `message` for `id`. With `max_queued > 0` this blocks while
    /// the queue holds `max_queued` messages and resumes once a handler
    /// dequeues one. Handlers for `id` may be registered before or after.
    pub fn send_message(&self, id: MessageId, message: M, max_queued: usize) {
        let queue = self.queue(id);
        {
            let mut state = queue.shared.lock();
            while max_queued > 0 && state.messages.len() == max_queued {
                state = queue.shared.wait(state);
            }
            {
                let logger = queue.logger.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(log) = &*logger {
                    log(id, &message, Direction::Outgoing);
                }
            }
            state.messages.push_back(message);
        }
        queue.shared.notify_work();
    }

    /// Register a FIFO handler with default settings.
    pub fn add_handler(
        &self,
        id: MessageId,
        on_message: impl FnMut(M) + Send + 'static,
    ) -> io::Result<()> {
        self.add_handler_with(id, HandlerConfig::new(on_message))
    }

    /// Register a handler; its thread starts immediately. Multiple handlers
    /// on one id drain the queue in parallel.
    pub fn add_handler_with(&self, id: MessageId, config: HandlerConfig<M>) -> io::Result<()> {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = self.queue(id);
        let thread_name = format!("{}_{id}", config.thread_name);
        tracing::debug!(id, thread = %thread_name, "adding message handler");
        let handle = worker::spawn(
            &thread_name,
            Arc::clone(&queue.shared),
            QueueWorker { queue, id, config },
        )?;
        handlers.entry(id).or_default().push(handle);
        Ok(())
    }

    /// Block until every message sent to `id` before this call has been
    /// fully handled (queue empty and no invocation in flight). Returns
    /// immediately for an id that never saw a send or handler.
    pub fn wait_until_empty(&self, id: MessageId) {
        let queue = {
            let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            match queues.get(&id) {
                Some(queue) => Arc::clone(queue),
                None => return,
            }
        };
        let mut state = queue.shared.lock();
        while !(state.messages.is_empty() && state.busy == 0) {
            state = queue
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stop and join every handler for `id`. Messages still queued are left
    /// in place; the queue survives and a later send reuses it.
    pub fn dispose(&self, id: MessageId) {
        tracing::debug!(id, "disposing message handlers");
        let removed = {
            let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            handlers.remove(&id)
        };
        // dropped here, outside the map lock: each handle joins its thread
        drop(removed);
    }

    /// Replace the logger for `id`; `None` disables logging.
    pub fn set_logger(&self, id: MessageId, logger: Option<MessageLogger<M>>) {
        let queue = self.queue(id);
        let mut slot = queue.logger.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = logger;
    }
}

impl<M: Send + 'static> Default for MessageManager<M> {
    fn default() -> Self {
        Self::new()
    }
}

struct QueueWorker<M> {
    queue: Arc<MessageQueue<M>>,
    id: MessageId,
    config: HandlerConfig<M>,
}

impl<M: Send + 'static> Worker for QueueWorker<M> {
    type State = QueueState<M>;
    type Message = M;

    fn message_available(&mut self, state: &mut QueueState<M>) -> bool {
        !state.messages.is_empty()
    }

    fn take_message(&mut self, state: &mut QueueState<M>) -> M {
        let message = match self.config.order {
            DrainOrder::Fifo => state.messages.pop_front(),
            DrainOrder::Lifo => state.messages.pop_back(),
            DrainOrder::Random => {
                let index = rand::rng().random_range(0..state.messages.len());
                state.messages.remove(index)
            }
        }
        .expect("take_message called without an available message");
        state.busy += 1;
        // producers blocked on a bounded queue wait on the same condvar
        self.queue.shared.notify_work();
        message
    }

    fn on_message(&mut self, message: M) {
        {
            let logger = self
                .queue
                .logger
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(log) = &*logger {
                log(self.id, &message, Direction::Incoming);
            }
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| (self.config.on_message)(message)));
        if let Err(payload) = outcome {
            let text = panic_text(payload.as_ref());
            match &mut self.config.on_panic {
                Some(on_panic) => on_panic(&text),
                None => tracing::error!(id = self.id, "message handler panicked: {text}"),
            }
        }

        let mut state = self.queue.shared.lock();
        state.busy -= 1;
        if state.messages.is_empty() && state.busy == 0 {
            self.queue.drained.notify_all();
        }
    }

    fn on_exit(&mut self) {
        if let Some(on_exit) = &mut self.config.on_exit {
            on_exit();
        }
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
