//! **soloinst**: single-instance detection and argument hand-off for
//! desktop applications.
//!
//! The first process to start becomes the *primary* by taking an exclusive
//! lock on a version-keyed file.  Every later launch (a *secondary*) encodes
//! its command line and hands it to the primary, then exits; the primary
//! decodes the message into the list of files to open and posts it to its
//! own event queue.
//!
//! # Architecture
//!
//! The crate is organised around two core traits:
//!
//! * [`traits::Transport`]: abstracts how a secondary reaches the primary
//!   (D-Bus, the macOS notification center, a Unix socket, a Win32
//!   window) so the rest of the crate is not coupled to any specific IPC
//!   mechanism.
//! * [`traits::Receiver`]: the primary's end of a transport, drained by the
//!   [`listener::MessageListener`].
//!
//! Concrete implementations live in [`transport`].  [`codec`] defines the
//! message format, [`lock`] the primary election, and [`instance`] ties them
//! together into the startup decision.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod event;
pub mod instance;
pub mod listener;
pub mod lock;
pub mod traits;
pub mod transport;
