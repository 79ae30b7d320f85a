//! Transport abstraction: the only seam that touches the network.
//!
//! A [`Connector`] opens a [`Connection`]: a [`Transport`] for writes plus a
//! channel of [`TransportEvent`]s for everything the socket reports. The
//! channel core never sees a raw socket, so it can be driven by a fake.

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::WsError;

/// Events reported by an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame.
    Message(String),
    /// A socket-level error. A `Closed` event follows when the socket is gone.
    Error(String),
    /// Frames accepted by [`Transport::send`] that never reached the socket,
    /// oldest first. Reported just before `Closed`.
    Undelivered(Vec<String>),
    /// The connection closed. Always the last event of a connection.
    Closed { code: u16, reason: String },
}

/// Write half of an open connection.
pub trait Transport: Send {
    /// Queue a text frame for sending.
    fn send(&mut self, frame: String) -> Result<(), WsError>;

    /// Start a graceful close. Completion is reported as [`TransportEvent::Closed`].
    fn close(&mut self, code: u16, reason: &str);
}

/// An open connection: the write half and its event feed.
pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Connection {
    pub fn new(
        transport: impl Transport + 'static,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            transport: Box::new(transport),
            events,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections to a URL.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Connection, WsError>>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording transport for driving the synchronous core in unit tests.

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub(crate) struct Recorded {
        pub sent: Vec<String>,
        pub closed: Option<(u16, String)>,
        /// Number of further sends that succeed; `None` means unlimited.
        pub sends_allowed: Option<usize>,
    }

    #[derive(Debug, Clone, Default)]
    pub(crate) struct RecordingTransport {
        pub log: Arc<Mutex<Recorded>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail every send after the next `n`.
        pub fn fail_after(self, n: usize) -> Self {
            self.log.lock().unwrap().sends_allowed = Some(n);
            self
        }

        pub fn sent(&self) -> Vec<serde_json::Value> {
            self.log
                .lock()
                .unwrap()
                .sent
                .iter()
                .map(|s| serde_json::from_str(s).unwrap())
                .collect()
        }

        pub fn closed(&self) -> Option<(u16, String)> {
            self.log.lock().unwrap().closed.clone()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, frame: String) -> Result<(), WsError> {
            let mut log = self.log.lock().unwrap();
            match log.sends_allowed {
                Some(0) => return Err(WsError::SendFailed("socket gone".into())),
                Some(ref mut n) => *n -= 1,
                None => {}
            }
            log.sent.push(frame);
            Ok(())
        }

        fn close(&mut self, code: u16, reason: &str) {
            self.log.lock().unwrap().closed = Some((code, reason.to_string()));
        }
    }
}
