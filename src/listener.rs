//! The primary's background listening service.
//!
//! [`MessageListener`] owns the receiving side of a
//! [`Transport`](crate::traits::Transport).  For push transports it runs one
//! worker thread that alternates between a cancellable one-second wait and a
//! non-blocking dispatch pass; for pull transports it only claims the
//! endpoint and lets the host feed messages in, either one at a time with
//! [`MessageListener::handle_message`] or by driving
//! [`MessageListener::poll`] from its own event loop.
//!
//! ```text
//!          init()              shutdown()
//!   Idle ─────────► Listening ───────────► Stopping ──► Idle
//! ```
//!
//! Both transitions are guarded: a second `init` is a no-op, and `shutdown`
//! is a no-op unless the listener is listening.

use crate::bridge::EventBridge;
use crate::traits::{Delivery, Receiver, Transport};
use log::{debug, error, trace, warn};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// How often the worker checks for cancellation between dispatch passes.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of a [`MessageListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Listening,
    Stopping,
}

/// A stop flag that can be waited on.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter.
    pub fn cancel(&self) {
        let (stopped, condition) = &*self.inner;
        *stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condition.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until cancelled or until `timeout` elapses.  Returns whether the
    /// token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (stopped, condition) = &*self.inner;
        let guard = stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = condition
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Receives messages from secondary instances and forwards them to the host
/// through an [`EventBridge`].
///
/// Only the process holding the instance lock should run one; see
/// [`InstanceCheck::listener`](crate::instance::InstanceCheck::listener).
/// Dropping the listener shuts it down.
pub struct MessageListener<T: Transport> {
    transport: Arc<T>,
    bridge: EventBridge,
    state: ListenerState,
    poll_interval: Duration,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    endpoint: Option<T::Receiver>,
}

impl<T: Transport> MessageListener<T> {
    pub fn new(transport: T, bridge: EventBridge) -> Self {
        Self {
            transport: Arc::new(transport),
            bridge,
            state: ListenerState::Idle,
            poll_interval: CANCEL_POLL_INTERVAL,
            cancel: CancellationToken::new(),
            worker: None,
            endpoint: None,
        }
    }

    /// Override [`CANCEL_POLL_INTERVAL`].
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Current lifecycle state.
    ///
    /// A push worker that could not claim its endpoint has already exited;
    /// the listener then reports [`ListenerState::Idle`].
    pub fn state(&self) -> ListenerState {
        match &self.worker {
            Some(worker) if self.state == ListenerState::Listening && worker.is_finished() => {
                ListenerState::Idle
            }
            _ => self.state,
        }
    }

    /// Start receiving.
    ///
    /// Push transports get a dedicated worker thread which claims the
    /// endpoint itself; pull transports claim it here, synchronously.  A
    /// failure to claim the endpoint is logged and the host keeps running
    /// without receiving capability; it is not retried.
    pub fn init(&mut self) {
        if self.state() != ListenerState::Idle {
            debug!("message listener already initialized");
            return;
        }
        // Reap a worker that gave up after a failed registration.
        self.shutdown();
        self.state = ListenerState::Listening;

        match self.transport.delivery() {
            Delivery::Push => {
                let cancel = CancellationToken::new();
                self.cancel = cancel.clone();
                let transport = Arc::clone(&self.transport);
                let bridge = self.bridge.clone();
                let interval = self.poll_interval;
                let spawned = std::thread::Builder::new()
                    .name("instance-listener".into())
                    .spawn(move || listen(&*transport, &bridge, &cancel, interval));
                match spawned {
                    Ok(handle) => self.worker = Some(handle),
                    Err(e) => {
                        error!("cannot spawn message listener thread: {}", e);
                        self.state = ListenerState::Idle;
                    }
                }
            }
            Delivery::Pull => match self.transport.receive_messages() {
                Ok(endpoint) => {
                    trace!("receiving endpoint registered");
                    self.endpoint = Some(endpoint);
                }
                Err(e) => {
                    error!("cannot register receiving endpoint: {}", e);
                    self.state = ListenerState::Idle;
                }
            },
        }
    }

    /// Run one dispatch pass over a pull endpoint.
    ///
    /// Pull transports that queue messages themselves rather than handing
    /// them to the host (the macOS notification center) are drained by
    /// calling this from the host's event loop.  Returns the number of
    /// messages handled; always 0 when not listening or for push transports.
    pub fn poll(&mut self) -> usize {
        let Some(endpoint) = self.endpoint.as_mut() else {
            return 0;
        };
        let bridge = &self.bridge;
        match endpoint.dispatch(&mut |message| bridge.deliver(&message)) {
            Ok(n) => n,
            Err(e) => {
                warn!("dispatch error: {}", e);
                0
            }
        }
    }

    /// Feed a message received by the host's own event loop.
    ///
    /// Only meaningful for [`Delivery::Pull`] transports after a successful
    /// [`init`](Self::init); otherwise the message is ignored.
    pub fn handle_message(&self, message: &str) {
        if self.endpoint.is_none() {
            debug!("not listening, ignoring message");
            return;
        }
        self.bridge.deliver(message);
    }

    /// Stop receiving and wait for the worker, if any, to exit.
    ///
    /// Returns within roughly one dispatch pass.  Calling it again, or
    /// before [`init`](Self::init), does nothing.
    pub fn shutdown(&mut self) {
        if self.state != ListenerState::Listening {
            return;
        }
        debug!("message listener shutdown");
        self.state = ListenerState::Stopping;
        if let Some(worker) = self.worker.take() {
            self.cancel.cancel();
            if worker.join().is_err() {
                error!("message listener thread panicked");
            }
        }
        self.endpoint = None;
        self.state = ListenerState::Idle;
    }
}

impl<T: Transport> Drop for MessageListener<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker body for push transports.
fn listen<T: Transport>(
    transport: &T,
    bridge: &EventBridge,
    cancel: &CancellationToken,
    interval: Duration,
) {
    let mut receiver = match transport.receive_messages() {
        Ok(receiver) => receiver,
        Err(e) => {
            error!("{}", e);
            error!("message listening terminating");
            return;
        }
    };
    trace!("starting to listen for messages");

    loop {
        if cancel.wait_timeout(interval) {
            break;
        }
        match receiver.dispatch(&mut |message| bridge.deliver(&message)) {
            Ok(0) => {}
            Ok(n) => debug!("dispatched {} message(s)", n),
            Err(e) => warn!("dispatch error: {}", e),
        }
    }
    debug!("message listener stopped");
}
