//! Entry point for the **soloinst** demo host.
//!
//! Runs the instance check for this binary's version.  A secondary launch
//! forwards its arguments to the primary and exits.  The primary starts the
//! message listener and logs every event it would hand to a GUI front-end.

use log::{error, info};
use soloinst::config::Config;
use soloinst::event::InstanceEvent;
use soloinst::instance::{InstanceCheck, Startup};
use soloinst::transport::platform_transport;
use std::sync::mpsc;
use std::time::Duration;

/// How long the event loop waits for an event before servicing the
/// listener.
const EVENT_TICK: Duration = Duration::from_millis(100);

/// Resolve the config directory (the platform config directory plus
/// `soloinst`, e.g. `$XDG_CONFIG_HOME/soloinst` or `%APPDATA%\soloinst`).
fn config_dir() -> std::path::PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("soloinst")
}

/// Try to load the config from `<config_dir>/config.json`, falling back to
/// compiled-in defaults.
fn load_config() -> Config {
    let path = config_dir().join("config.json");
    match Config::load(&path) {
        Ok(cfg) => {
            info!("loaded config from {}", path.display());
            cfg
        }
        Err(e) => {
            info!("no config file ({}), using defaults", e);
            Config::default()
        }
    }
}

fn main() {
    env_logger::init();

    let config = load_config();
    let version = env!("CARGO_PKG_VERSION");
    let args: Vec<String> = std::env::args_os()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    let transport = platform_transport(&config.instance, version);
    let mut check = InstanceCheck::new(&config.instance, version, transport);

    match check.check(&args) {
        Startup::Forwarded => return,
        Startup::Standalone => {
            info!(
                "running standalone, arguments: {:?}",
                args.get(1..).unwrap_or_default()
            );
            return;
        }
        Startup::Primary => {}
    }

    let (tx, rx) = mpsc::channel::<InstanceEvent>();
    let Some(mut listener) = check.listener(tx) else {
        error!("primary instance without a listener");
        std::process::exit(1);
    };
    listener.init();

    info!("soloinst primary running");
    loop {
        match rx.recv_timeout(EVENT_TICK) {
            Ok(InstanceEvent::LoadPaths(paths)) => {
                for path in paths {
                    info!("load {}", path.display());
                }
            }
            Ok(InstanceEvent::BringToFront) => info!("bring to front"),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                run_native_loop(EVENT_TICK);
                listener.poll();
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("event queue closed, exiting");
}

/// Give the platform run loop a turn so observers registered on this thread
/// get their notifications.
#[cfg(target_os = "macos")]
fn run_native_loop(timeout: Duration) {
    use objc2_foundation::{NSDate, NSRunLoop};
    unsafe {
        let until = NSDate::dateWithTimeIntervalSinceNow(timeout.as_secs_f64());
        NSRunLoop::currentRunLoop().runUntilDate(&until);
    }
}

#[cfg(not(target_os = "macos"))]
fn run_native_loop(_timeout: Duration) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_follows_the_platform_convention() {
        let dir = config_dir();
        assert!(dir.ends_with("soloinst"));
        if let Some(base) = dirs::config_dir() {
            assert_eq!(dir, base.join("soloinst"));
        }
    }
}
