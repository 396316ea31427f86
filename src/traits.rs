//! Core traits that decouple the instance check from any specific
//! inter-process transport.
//!
//! Every concrete backend (the D-Bus session bus, a Unix socket, a Win32
//! window, a test harness, …) implements [`Transport`].  The
//! [`MessageListener`](crate::listener::MessageListener) and
//! [`send_to_primary`](crate::transport::send_to_primary) only depend on
//! these abstractions.

/// How inbound messages reach the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Messages must be fetched: the listener runs a worker thread that
    /// periodically calls [`Receiver::dispatch`].
    Push,
    /// The host's native event loop receives messages itself and hands them
    /// to [`MessageListener::handle_message`](crate::listener::MessageListener::handle_message).
    /// No worker thread is started.
    Pull,
}

/// A way for a secondary instance to reach the primary.
///
/// # Contract
///
/// * [`locate_primary`](Transport::locate_primary) never blocks for long and
///   returns `Ok(None)` when no primary is listening.
/// * [`deliver_message`](Transport::deliver_message) transmits the payload
///   once, without waiting for a reply.
/// * [`receive_messages`](Transport::receive_messages) claims the receiving
///   endpoint.  It is called at most once per listener start, on the worker
///   thread for [`Delivery::Push`] transports.
pub trait Transport: Send + Sync + 'static {
    /// The error type produced by this transport.
    type Error: std::error::Error + Send + 'static;

    /// Handle to a located primary, consumed by a delivery.
    type Peer;

    /// The primary-side endpoint returned by
    /// [`receive_messages`](Transport::receive_messages).
    type Receiver: Receiver;

    /// Whether the primary side needs a worker thread.
    fn delivery(&self) -> Delivery;

    /// Find the primary's receiving endpoint.
    fn locate_primary(&self) -> Result<Option<Self::Peer>, Self::Error>;

    /// Hand `payload` to the located primary.
    fn deliver_message(&self, peer: Self::Peer, payload: &str) -> Result<(), Self::Error>;

    /// Claim the receiving endpoint.  Dropping the returned receiver
    /// releases it.
    fn receive_messages(&self) -> Result<Self::Receiver, Self::Error>;
}

/// The primary's end of a [`Transport`].
pub trait Receiver: Send {
    /// The error type produced by this receiver.
    type Error: std::error::Error + Send + 'static;

    /// Run one bounded, non-blocking pass over pending messages, passing
    /// each payload to `handler`.  Returns how many messages were handled.
    fn dispatch(&mut self, handler: &mut dyn FnMut(String)) -> Result<usize, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    //  In-memory transport

    /// A test double whose "primary" is a shared queue.
    #[derive(Default)]
    struct QueueTransport {
        queue: Arc<Mutex<Option<VecDeque<String>>>>,
    }

    struct QueueReceiver {
        queue: Arc<Mutex<Option<VecDeque<String>>>>,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("queue error")]
    struct QueueError;

    impl Transport for QueueTransport {
        type Error = QueueError;
        type Peer = ();
        type Receiver = QueueReceiver;

        fn delivery(&self) -> Delivery {
            Delivery::Push
        }

        fn locate_primary(&self) -> Result<Option<()>, QueueError> {
            Ok(self.queue.lock().unwrap().as_ref().map(|_| ()))
        }

        fn deliver_message(&self, _: (), payload: &str) -> Result<(), QueueError> {
            match self.queue.lock().unwrap().as_mut() {
                Some(q) => {
                    q.push_back(payload.to_string());
                    Ok(())
                }
                None => Err(QueueError),
            }
        }

        fn receive_messages(&self) -> Result<QueueReceiver, QueueError> {
            *self.queue.lock().unwrap() = Some(VecDeque::new());
            Ok(QueueReceiver {
                queue: Arc::clone(&self.queue),
            })
        }
    }

    impl Receiver for QueueReceiver {
        type Error = QueueError;

        fn dispatch(&mut self, handler: &mut dyn FnMut(String)) -> Result<usize, QueueError> {
            let pending: Vec<String> = self
                .queue
                .lock()
                .unwrap()
                .as_mut()
                .map(|q| q.drain(..).collect())
                .unwrap_or_default();
            let n = pending.len();
            for message in pending {
                handler(message);
            }
            Ok(n)
        }
    }

    #[test]
    fn no_primary_until_someone_receives() {
        let t = QueueTransport::default();
        assert!(t.locate_primary().unwrap().is_none());
        let _rx = t.receive_messages().unwrap();
        assert!(t.locate_primary().unwrap().is_some());
    }

    #[test]
    fn delivered_payloads_are_dispatched_in_order() {
        let t = QueueTransport::default();
        let mut rx = t.receive_messages().unwrap();
        for payload in ["one", "two"] {
            let peer = t.locate_primary().unwrap().unwrap();
            t.deliver_message(peer, payload).unwrap();
        }
        let mut seen = Vec::new();
        assert_eq!(rx.dispatch(&mut |m| seen.push(m)).unwrap(), 2);
        assert_eq!(seen, vec!["one", "two"]);
        assert_eq!(rx.dispatch(&mut |m| seen.push(m)).unwrap(), 0);
    }
}
