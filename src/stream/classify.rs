use std::io::ErrorKind;

use serde::Deserialize;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Decides which read failures are worth reconnecting after.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Reconnect only when the peer reset the TCP connection.
    PeerResetOnly,
    /// Reconnect on any transport-level loss: resets, aborts, broken pipes,
    /// timeouts and sockets dropped without a closing handshake.
    #[default]
    Transient,
}

/// Outcome of classifying a failed read or write on a live connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadFailure {
    /// Connection was lost; dial again after the reconnect delay.
    Transient,
    /// The stream ends for good.
    Terminal,
}

impl ReconnectPolicy {
    pub fn classify(self, error: &WsError) -> ReadFailure {
        let transient = match self {
            Self::PeerResetOnly => is_peer_reset(error),
            Self::Transient => is_transport_loss(error),
        };

        if transient {
            ReadFailure::Transient
        } else {
            ReadFailure::Terminal
        }
    }
}

fn is_peer_reset(error: &WsError) -> bool {
    matches!(error, WsError::Io(io) if io.kind() == ErrorKind::ConnectionReset)
}

fn is_transport_loss(error: &WsError) -> bool {
    match error {
        WsError::Io(io) => matches!(
            io.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof
                | ErrorKind::TimedOut
        ),
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        _ => false,
    }
}
