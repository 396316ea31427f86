//! macOS distributed-notification [`Transport`] implementation.
//!
//! Secondaries post a notification named after the app and version key to
//! the user's `NSDistributedNotificationCenter`, with the payload as the
//! notification object.  The primary observes that name.
//!
//! The notification center keeps no record of observers a sender could
//! query, so [`NotificationTransport::locate_primary`] always reports a
//! primary: losing the lock is the only evidence that one is running.
//!
//! Receiving is [`Delivery::Pull`].  Notifications are delivered on the run
//! loop of the thread that registered the observer, i.e. the thread that
//! called [`MessageListener::init`](crate::listener::MessageListener::init);
//! the observer only queues the payload.  The host drains that queue with
//! [`MessageListener::poll`](crate::listener::MessageListener::poll).

use crate::lock::normalize_version;
use crate::traits::{Delivery, Receiver, Transport};
use block2::RcBlock;
use log::{debug, info, trace};
use objc2::rc::Retained;
use objc2::runtime::{AnyObject, NSObjectProtocol, ProtocolObject};
use objc2_foundation::{NSDistributedNotificationCenter, NSNotification, NSString};
use std::convert::Infallible;
use std::ptr::NonNull;
use std::sync::mpsc;

/// A [`Transport`] over the distributed notification center.
#[derive(Debug, Clone)]
pub struct NotificationTransport {
    name: String,
}

impl NotificationTransport {
    /// Use notifications called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Notification name for `app_name` at `version`, keyed the same way as
    /// the instance lock.
    pub fn for_instance(app_name: &str, version: &str) -> Self {
        Self::new(format!(
            "{}.InstanceCheck.{}",
            app_name,
            normalize_version(version)
        ))
    }

    /// The notification name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for NotificationTransport {
    type Error = Infallible;
    type Peer = ();
    type Receiver = NotificationReceiver;

    fn delivery(&self) -> Delivery {
        Delivery::Pull
    }

    fn locate_primary(&self) -> Result<Option<()>, Self::Error> {
        Ok(Some(()))
    }

    fn deliver_message(&self, _: (), payload: &str) -> Result<(), Self::Error> {
        let name = NSString::from_str(&self.name);
        let object = NSString::from_str(payload);
        // SAFETY: both arguments are valid NSStrings, which is all a
        // distributed notification may carry.
        unsafe {
            NSDistributedNotificationCenter::defaultCenter()
                .postNotificationName_object_deliverImmediately(&name, Some(&*object), true);
        }
        trace!("notification {} posted", self.name);
        Ok(())
    }

    /// Register an observer for the notification name on the calling
    /// thread's run loop.
    fn receive_messages(&self) -> Result<NotificationReceiver, Self::Error> {
        let (inbox, queue) = mpsc::channel();
        let block = RcBlock::new(move |notification: NonNull<NSNotification>| {
            // SAFETY: the center passes a valid notification for the
            // duration of the call.
            let notification = unsafe { notification.as_ref() };
            match payload_of(notification) {
                Some(payload) => {
                    let _ = inbox.send(payload);
                }
                None => debug!("notification without a string payload"),
            }
        });
        let name = NSString::from_str(&self.name);
        // SAFETY: the block is copied by the center and only touches the
        // channel it owns.
        let observer = unsafe {
            NSDistributedNotificationCenter::defaultCenter()
                .addObserverForName_object_queue_usingBlock(Some(&*name), None, None, &block)
        };
        info!("observing notification {}", self.name);
        Ok(NotificationReceiver { observer, queue })
    }
}

/// Extract the payload string a secondary attached to `notification`.
fn payload_of(notification: &NSNotification) -> Option<String> {
    // SAFETY: reading the object of a live notification.
    let object = unsafe { notification.object() }?;
    let payload = object.downcast::<NSString>().ok()?;
    Some(payload.to_string())
}

/// The registered observer.  Dropping it unregisters from the center.
pub struct NotificationReceiver {
    observer: Retained<ProtocolObject<dyn NSObjectProtocol>>,
    queue: mpsc::Receiver<String>,
}

// SAFETY: the observer token is an opaque handle only ever passed back to
// the notification center, whose add/remove operations are thread-safe.
unsafe impl Send for NotificationReceiver {}

impl Receiver for NotificationReceiver {
    type Error = Infallible;

    fn dispatch(&mut self, handler: &mut dyn FnMut(String)) -> Result<usize, Self::Error> {
        let mut handled = 0;
        for message in self.queue.try_iter() {
            handler(message);
            handled += 1;
        }
        Ok(handled)
    }
}

impl Drop for NotificationReceiver {
    fn drop(&mut self) {
        let observer: &AnyObject = (*self.observer).as_ref();
        // SAFETY: `observer` is the token returned when registering.
        unsafe {
            NSDistributedNotificationCenter::defaultCenter().removeObserver(observer);
        }
        debug!("notification observer removed");
    }
}
