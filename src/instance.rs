//! Startup decision: become the primary, forward to it, or run standalone.

use crate::bridge::EventBridge;
use crate::codec;
use crate::config::InstanceConfig;
use crate::event::InstanceEvent;
use crate::listener::MessageListener;
use crate::lock::LockCoordinator;
use crate::traits::Transport;
use crate::transport::send_to_primary;
use log::info;
use std::sync::mpsc;

/// Which side of the lock this process ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    Primary,
    Secondary,
}

/// What the host should do after [`InstanceCheck::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
    /// This process holds the lock and should start a listener.
    Primary,
    /// The arguments were handed to the primary; this process should exit.
    Forwarded,
    /// Another process holds the lock but nothing was handed over; carry on
    /// as a normal instance without a listener.
    Standalone,
}

impl Startup {
    pub fn role(self) -> InstanceRole {
        match self {
            Startup::Primary => InstanceRole::Primary,
            Startup::Forwarded | Startup::Standalone => InstanceRole::Secondary,
        }
    }

    pub fn should_exit(self) -> bool {
        self == Startup::Forwarded
    }
}

/// Owns the instance lock for the lifetime of the host.
pub struct InstanceCheck<T: Transport> {
    coordinator: LockCoordinator,
    transport: T,
    version: String,
    single_instance: bool,
    startup: Option<Startup>,
}

impl<T: Transport> InstanceCheck<T> {
    /// Lock under `config.cache_dir()`, keyed by `version`.
    pub fn new(config: &InstanceConfig, version: &str, transport: T) -> Self {
        Self::with_coordinator(
            LockCoordinator::new(config.cache_dir(), config.app_name.clone()),
            version,
            config.single_instance,
            transport,
        )
    }

    /// Use an explicit coordinator.  `single_instance` forwards every launch,
    /// as if `--single-instance` were always given.
    pub fn with_coordinator(
        coordinator: LockCoordinator,
        version: &str,
        single_instance: bool,
        transport: T,
    ) -> Self {
        Self {
            coordinator,
            transport,
            version: version.to_string(),
            single_instance,
            startup: None,
        }
    }

    /// Decide the startup mode from the process arguments (program path
    /// included).
    ///
    /// The decision is made once; later calls return the first result.
    pub fn check<I, S>(&mut self, args: I) -> Startup
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Some(startup) = self.startup {
            return startup;
        }
        let analysis = codec::analyze(args);

        let startup = if self.coordinator.try_become_primary(&self.version) {
            info!("instance check: this is the primary instance");
            Startup::Primary
        } else if !(analysis.should_send || self.single_instance) {
            info!("instance check: another instance is running, single-instance not requested");
            Startup::Standalone
        } else if send_to_primary(&self.transport, &analysis.encoded_payload) {
            info!("instance check: another instance found, this instance will terminate");
            Startup::Forwarded
        } else {
            info!("instance check: another instance not found, continuing standalone");
            Startup::Standalone
        };
        self.startup = Some(startup);
        startup
    }

    /// The decision of [`check`](Self::check), if it ran.
    pub fn startup(&self) -> Option<Startup> {
        self.startup
    }

    pub fn coordinator(&self) -> &LockCoordinator {
        &self.coordinator
    }

    /// A listener posting to `sink`, or `None` unless this process is the
    /// primary.  The listener is returned uninitialized.
    pub fn listener(&self, sink: mpsc::Sender<InstanceEvent>) -> Option<MessageListener<T>>
    where
        T: Clone,
    {
        if !self.coordinator.is_primary() {
            return None;
        }
        Some(MessageListener::new(
            self.transport.clone(),
            EventBridge::new(sink),
        ))
    }
}
