//! Events posted to the host application.
//!
//! The host owns the receiving end of an [`mpsc`](std::sync::mpsc) channel
//! and drains it from its own event loop; the
//! [`EventBridge`](crate::bridge::EventBridge) only ever sends.

use std::path::PathBuf;

/// Something the host should react to after another instance contacted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceEvent {
    /// Open these files, in this order.
    LoadPaths(Vec<PathBuf>),
    /// Restore the main window and raise it to the foreground.
    BringToFront,
}
