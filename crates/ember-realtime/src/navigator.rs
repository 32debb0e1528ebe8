//! Navigator implementations for headless clients.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::collaborators::Navigator;

/// Logs the route instead of navigating.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn navigate_to(&self, route: &str) {
        info!(route, "navigation requested");
    }
}

/// Forwards routes to a UI loop over a channel.
#[derive(Clone, Debug)]
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelNavigator {
    /// Navigator plus the receiver the UI loop drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn navigate_to(&self, route: &str) {
        if self.tx.send(route.to_string()).is_err() {
            warn!(route, "navigation dropped, UI loop is gone");
        }
    }
}
