//! D-Bus session-bus [`Transport`] implementation.
//!
//! The primary owns the well-known name [`BUS_NAME`] and exports an object at
//! [`OBJECT_PATH`] implementing a single method,
//! `io.github.soloinst.InstanceCheck.AnotherInstance(s data)`.  Secondary
//! instances call it with the no-reply flag set, so the hand-off never waits
//! on the primary.
//!
//! The object also answers `org.freedesktop.DBus.Introspectable.Introspect`
//! with a static descriptor of that interface, which makes it visible to bus
//! inspectors such as D-Feet or `busctl`.

use crate::traits::{Delivery, Receiver, Transport};
use log::{info, trace};
use std::sync::mpsc;
use zbus::blocking::fdo::DBusProxy;
use zbus::blocking::Connection;
use zbus::fdo::{RequestNameFlags, RequestNameReply};
use zbus::message::Flags;
use zbus::Message;
use zbus::names::BusName;

/// Well-known bus name, also used as the interface name.
pub const BUS_NAME: &str = "io.github.soloinst.InstanceCheck";

/// Path of the exported object.
pub const OBJECT_PATH: &str = "/io/github/soloinst/InstanceCheck";

/// The one method of the interface.
pub const METHOD_NAME: &str = "AnotherInstance";

/// Errors produced by the D-Bus transport.
#[derive(Debug, thiserror::Error)]
pub enum DbusTransportError {
    #[error("dbus error: {0}")]
    Bus(#[from] zbus::Error),
    #[error("dbus call failed: {0}")]
    Call(#[from] zbus::fdo::Error),
    #[error("invalid bus name: {0}")]
    Name(#[from] zbus::names::Error),
    #[error("not primary owner of the bus name ({0:?}), probably another instance is running")]
    NotPrimaryOwner(RequestNameReply),
}

/// A [`Transport`] over the user's D-Bus session bus.
#[derive(Debug, Clone, Default)]
pub struct DbusTransport;

impl DbusTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for DbusTransport {
    type Error = DbusTransportError;
    type Peer = Connection;
    type Receiver = DbusReceiver;

    fn delivery(&self) -> Delivery {
        Delivery::Push
    }

    /// Connect to the session bus and check whether anyone owns
    /// [`BUS_NAME`].
    fn locate_primary(&self) -> Result<Option<Connection>, Self::Error> {
        let connection = Connection::session()?;
        let owned = DBusProxy::new(&connection)?.name_has_owner(BusName::try_from(BUS_NAME)?)?;
        Ok(owned.then_some(connection))
    }

    fn deliver_message(&self, connection: Connection, payload: &str) -> Result<(), Self::Error> {
        let message = Message::method_call(OBJECT_PATH, METHOD_NAME)?
            .destination(BUS_NAME)?
            .interface(BUS_NAME)?
            .with_flags(Flags::NoReplyExpected)?
            .build(&(payload,))?;
        connection.send(&message)?;
        trace!("dbus message sent");
        Ok(())
    }

    /// Export the object and request [`BUS_NAME`] without queueing.
    ///
    /// Fails with [`DbusTransportError::NotPrimaryOwner`] if another process
    /// already owns the name.
    fn receive_messages(&self) -> Result<DbusReceiver, Self::Error> {
        let receiver = DbusReceiver::serve(Connection::session()?)?;
        let reply = receiver
            .connection
            .request_name_with_flags(BUS_NAME, RequestNameFlags::DoNotQueue.into())?;
        if !matches!(reply, RequestNameReply::PrimaryOwner) {
            return Err(DbusTransportError::NotPrimaryOwner(reply));
        }
        info!("dbus object registered at {} as {}", OBJECT_PATH, BUS_NAME);
        Ok(receiver)
    }
}

/// The exported object.  Method calls are queued for the listener's next
/// dispatch pass.
struct InstanceCheckInterface {
    inbox: mpsc::Sender<String>,
}

#[zbus::interface(name = "io.github.soloinst.InstanceCheck")]
impl InstanceCheckInterface {
    fn another_instance(&self, data: String) {
        trace!("dbus method {} received", METHOD_NAME);
        let _ = self.inbox.send(data);
    }
}

/// The primary's bus connection.  Dropping it releases the name and the
/// object.
pub struct DbusReceiver {
    connection: Connection,
    queue: mpsc::Receiver<String>,
}

impl DbusReceiver {
    /// Export the interface object on `connection`.
    fn serve(connection: Connection) -> Result<Self, DbusTransportError> {
        let (inbox, queue) = mpsc::channel();
        connection
            .object_server()
            .at(OBJECT_PATH, InstanceCheckInterface { inbox })?;
        Ok(Self { connection, queue })
    }
}

impl Receiver for DbusReceiver {
    type Error = DbusTransportError;

    fn dispatch(&mut self, handler: &mut dyn FnMut(String)) -> Result<usize, Self::Error> {
        let mut handled = 0;
        for message in self.queue.try_iter() {
            handler(message);
            handled += 1;
        }
        Ok(handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use zbus::blocking::connection::Builder;
    use zbus::names::{InterfaceName, MemberName};
    use zbus::zvariant::ObjectPath;
    use zbus::Guid;

    /// A receiver serving one end of a private connection, and the other end.
    fn serving_pair() -> (DbusReceiver, Connection) {
        let (server_end, client_end) = UnixStream::pair().unwrap();
        let guid = Guid::generate();
        let server = std::thread::spawn(move || {
            Builder::unix_stream(server_end)
                .server(guid)
                .unwrap()
                .p2p()
                .build()
                .unwrap()
        });
        let client = Builder::unix_stream(client_end).p2p().build().unwrap();
        let receiver = DbusReceiver::serve(server.join().unwrap()).unwrap();
        (receiver, client)
    }

    #[test]
    fn names_are_valid_on_the_bus() {
        assert!(BusName::try_from(BUS_NAME).is_ok());
        assert!(InterfaceName::try_from(BUS_NAME).is_ok());
        assert!(MemberName::try_from(METHOD_NAME).is_ok());
        assert!(ObjectPath::try_from(OBJECT_PATH).is_ok());
    }

    #[test]
    fn method_calls_are_queued_in_order() {
        let (inbox, queue) = mpsc::channel();
        let iface = InstanceCheckInterface { inbox };
        iface.another_instance("app : /a.stl".into());
        iface.another_instance("app : /b.stl".into());
        let seen: Vec<String> = queue.try_iter().collect();
        assert_eq!(seen, vec!["app : /a.stl", "app : /b.stl"]);
    }

    #[test]
    fn calls_over_the_connection_reach_dispatch() {
        let (mut receiver, client) = serving_pair();
        for payload in ["app : /a.stl", "app : /b.stl"] {
            client
                .call_method(None::<&str>, OBJECT_PATH, Some(BUS_NAME), METHOD_NAME, &(payload,))
                .unwrap();
        }
        let mut seen = Vec::new();
        assert_eq!(receiver.dispatch(&mut |m| seen.push(m)).unwrap(), 2);
        assert_eq!(seen, vec!["app : /a.stl", "app : /b.stl"]);
        assert_eq!(receiver.dispatch(&mut |m| seen.push(m)).unwrap(), 0);
    }

    #[test]
    fn introspection_describes_the_interface() {
        let (_receiver, client) = serving_pair();
        let reply = client
            .call_method(
                None::<&str>,
                OBJECT_PATH,
                Some("org.freedesktop.DBus.Introspectable"),
                "Introspect",
                &(),
            )
            .unwrap();
        let xml: String = reply.body().deserialize().unwrap();
        assert!(xml.contains(&format!(r#"<interface name="{BUS_NAME}">"#)));
        assert!(xml.contains(&format!(r#"<method name="{METHOD_NAME}">"#)));
    }

    #[test]
    fn unknown_methods_are_refused() {
        let (mut receiver, client) = serving_pair();
        let result = client.call_method(
            None::<&str>,
            OBJECT_PATH,
            Some(BUS_NAME),
            "SomethingElse",
            &("app : /a.stl",),
        );
        assert!(result.is_err());
        let mut seen = Vec::new();
        assert_eq!(receiver.dispatch(&mut |m| seen.push(m)).unwrap(), 0);
    }
}
