//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a connection can occupy in this protocol,
//! a reduced version of the TCP state diagram (RFC 793 §3.2): the handshake
//! is three messages, teardown is best-effort, and only the client ever
//! closes, so the FIN_WAIT_2/CLOSING/TIME_WAIT tail collapses into a single
//! waiting state.  State transitions are driven by [`crate::client`] and
//! [`crate::server`]; this module only names the states.

/// All possible states of the connection FSM.
///
/// ```text
/// client:  CLOSED ──SYN sent──▶ SYN_SENT ──SYN-ACK──▶ ESTABLISHED
///                                                          │ all data acked,
///                                                          │ FIN sent
///                                                          ▼
///          CLOSED ◀──FIN-ACK rcvd (or 5 s give-up)──── FIN_WAIT
///
/// server:  LISTEN ──SYN rcvd──▶ SYN_RCVD ──ACK rcvd──▶ ESTABLISHED
///             ▲                                            │ FIN rcvd,
///             │                                            │ FIN-ACK sent
///             └── CLOSED ◀──final ACK (or 5 s)── FIN_WAIT ◀┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection exists; initial client state.
    Closed,
    /// Passive open: waiting for a peer's SYN; initial server state.
    Listen,
    /// SYN has been sent; waiting for SYN-ACK.
    SynSent,
    /// SYN received; SYN-ACK sent; waiting for the handshake ACK.
    SynReceived,
    /// Handshake complete; data transfer in progress.
    Established,
    /// Closing exchange in flight: the FIN (client) or FIN-ACK (server) has
    /// been sent and the final reply is awaited, with a deadline.
    FinWait,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Closed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
