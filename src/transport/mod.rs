//! Concrete [`Transport`](crate::traits::Transport) backends and the
//! secondary-side hand-off.
//!
//! Exactly one backend is compiled in as [`PlatformTransport`]:
//!
//! | target                          | backend                    |
//! |---------------------------------|----------------------------|
//! | Linux with the `dbus` feature   | [`dbus::DbusTransport`]    |
//! | macOS                           | [`notification::NotificationTransport`] |
//! | other Unix targets              | [`socket::SocketTransport`]|
//! | Windows                         | [`window::WindowTransport`]|
//!
//! Nothing outside this module should reference a specific backend.

#[cfg(all(target_os = "linux", feature = "dbus"))]
pub mod dbus;
#[cfg(target_os = "macos")]
pub mod notification;
#[cfg(unix)]
pub mod socket;
#[cfg(windows)]
pub mod window;

use crate::config::InstanceConfig;
use crate::traits::Transport;
use log::{error, info};

#[cfg(all(target_os = "linux", feature = "dbus"))]
pub type PlatformTransport = dbus::DbusTransport;

#[cfg(target_os = "macos")]
pub type PlatformTransport = notification::NotificationTransport;

#[cfg(all(
    unix,
    not(target_os = "macos"),
    not(all(target_os = "linux", feature = "dbus"))
))]
pub type PlatformTransport = socket::SocketTransport;

#[cfg(windows)]
pub type PlatformTransport = window::WindowTransport;

/// Build the backend for the current platform.
#[cfg(all(target_os = "linux", feature = "dbus"))]
pub fn platform_transport(_config: &InstanceConfig, _version: &str) -> PlatformTransport {
    dbus::DbusTransport::new()
}

/// Build the backend for the current platform.
#[cfg(target_os = "macos")]
pub fn platform_transport(config: &InstanceConfig, version: &str) -> PlatformTransport {
    notification::NotificationTransport::for_instance(&config.app_name, version)
}

/// Build the backend for the current platform.
#[cfg(all(
    unix,
    not(target_os = "macos"),
    not(all(target_os = "linux", feature = "dbus"))
))]
pub fn platform_transport(config: &InstanceConfig, version: &str) -> PlatformTransport {
    socket::SocketTransport::for_instance(&config.runtime_dir(), &config.app_name, version)
}

/// Build the backend for the current platform.
#[cfg(windows)]
pub fn platform_transport(config: &InstanceConfig, _version: &str) -> PlatformTransport {
    window::WindowTransport::new(config.window_title.clone(), config.window_class.clone())
}

/// Hand `payload` to the running primary, fire-and-forget.
///
/// Returns `false` when no primary endpoint was found or the transport
/// failed; the caller should then carry on as a standalone instance.
pub fn send_to_primary<T: Transport>(transport: &T, payload: &str) -> bool {
    let peer = match transport.locate_primary() {
        Ok(Some(peer)) => peer,
        Ok(None) => {
            info!("no primary instance endpoint found");
            return false;
        }
        Err(e) => {
            error!("cannot reach primary instance: {}", e);
            return false;
        }
    };
    match transport.deliver_message(peer, payload) {
        Ok(()) => true,
        Err(e) => {
            error!("message to primary instance not sent: {}", e);
            false
        }
    }
}
