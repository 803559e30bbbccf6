//! Receiving side of the protocol.
//!
//! The [`Server`] owns one UDP socket and serves connections sequentially:
//! accept a handshake, reassemble the data stream while answering every
//! segment with a cumulative ACK, honor the peer's FIN, then go back to
//! listening.  One connection at a time; datagrams from other peers are
//! logged and ignored while a connection is active.
//!
//! A [`LossModel`] is consulted for every datagram received on an
//! established connection, which is what makes a loopback run exercise
//! retransmission.  It is *not* consulted during handshake or teardown, so
//! a lossy configuration can always connect and always close.
//!
//! Every receive is unbounded except the final-ACK wait after the FIN-ACK:
//! that one carries a deadline, and the deadline is scoped so it cannot leak
//! into the next connection's accept loop.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use thiserror::Error;
use tokio::time;

use crate::loss::LossModel;
use crate::packet::{flags, Header, Packet};
use crate::receiver::{DataOutcome, ReorderBuffer};
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;

/// Default port the reference server listens on.
const DEFAULT_PORT: u16 = 11111;
/// Default probability of dropping an established-phase datagram.
const DEFAULT_LOSS_RATE: f64 = 0.3;
/// How long to wait for the peer's final teardown ACK.
const ACK_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
/// Initial sequence numbers are drawn from `0..=ISN_MAX`.
const ISN_MAX: u32 = 1500;

// ---------------------------------------------------------------------------
// Configuration and errors
// ---------------------------------------------------------------------------

/// Knobs for a server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Probability in `[0.0, 1.0]` of dropping an established-phase
    /// datagram.
    pub loss_rate: f64,
    /// Deadline for the final teardown ACK.
    pub ack_wait_timeout: Duration,
    /// Fixed RNG seed for the loss model; `None` seeds from the OS.  Each
    /// connection restarts the model, so a seeded server drops the same
    /// pattern for every client.
    pub loss_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            loss_rate: DEFAULT_LOSS_RATE,
            ack_wait_timeout: ACK_WAIT_TIMEOUT,
            loss_seed: None,
        }
    }
}

/// Errors surfaced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket failure: {0}")]
    Socket(#[from] SocketError),
}

/// What one completed connection amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnSummary {
    pub peer: SocketAddr,
    /// Bytes delivered in order to the reassembled stream.
    pub delivered_bytes: u64,
    /// Segments delivered through the cursor, drained ones included.
    pub segments_in_order: u64,
    /// Segments that arrived ahead of the cursor and were parked.
    pub segments_buffered: u64,
    /// Datagrams discarded by the loss model.
    pub datagrams_dropped: u64,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A bound server ready to accept connections.
#[derive(Debug)]
pub struct Server {
    socket: Socket,
    config: ServerConfig,
}

impl Server {
    /// Bind the server socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let socket = Socket::bind(config.bind_addr).await?;
        log::info!("[server] bound to {}", socket.local_addr);
        Ok(Self { socket, config })
    }

    /// Address the server actually bound to (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Serve connections until the socket fails.
    pub async fn run(mut self) -> Result<(), ServerError> {
        loop {
            self.serve_one().await?;
        }
    }

    /// Accept and fully serve a single connection.
    pub async fn serve_one(&mut self) -> Result<ConnSummary, ServerError> {
        let mut state = ConnectionState::Listen;
        log::info!("[server] listening on {}", self.socket.local_addr);

        // Accept: wait for a SYN.
        let (mut peer, mut client_isn) = loop {
            let (packet, from) = recv_packet(&self.socket).await?;
            if packet.header.flags == flags::SYN {
                break (from, packet.header.seq);
            }
            log::debug!(
                "[server] ignoring flags={:#05b} from {from} while listening",
                packet.header.flags
            );
        };

        let mut server_isn: u32 = rand::rng().random_range(0..=ISN_MAX);
        self.socket
            .send_to(&build_syn_ack(server_isn, client_isn), peer)
            .await?;
        advance(&mut state, ConnectionState::SynReceived);
        log::info!("[server] syn from {peer} (seq={client_isn}), replied with seq={server_isn}");

        // Third message: any ACK-flagged datagram from the peer completes
        // the handshake.  A fresh SYN rebinds the connection, covering both
        // a lost SYN-ACK and a new client starting over.
        loop {
            let (packet, from) = recv_packet(&self.socket).await?;
            let h = packet.header;
            if h.flags == flags::SYN {
                peer = from;
                client_isn = h.seq;
                server_isn = rand::rng().random_range(0..=ISN_MAX);
                self.socket
                    .send_to(&build_syn_ack(server_isn, client_isn), peer)
                    .await?;
                log::info!(
                    "[server] syn from {peer} (seq={client_isn}), replied with seq={server_isn}"
                );
                continue;
            }
            if from != peer {
                log::debug!("[server] ignoring datagram from {from} during handshake");
                continue;
            }
            if h.flags & flags::ACK != 0 {
                break;
            }
            log::debug!(
                "[server] ignoring flags={:#05b} while awaiting handshake ack",
                h.flags
            );
        }
        advance(&mut state, ConnectionState::Established);
        log::info!("[server] connection established with {peer}");

        // Established: reassemble data, ACK cumulatively, simulate loss.
        let mut reorder = ReorderBuffer::new(client_isn.wrapping_add(1));
        let mut loss = match self.config.loss_seed {
            Some(seed) => LossModel::seeded(self.config.loss_rate, seed),
            None => LossModel::new(self.config.loss_rate),
        };

        let fin_seq = loop {
            let (packet, from) = recv_packet(&self.socket).await?;
            if from != peer {
                log::debug!("[server] ignoring datagram from {from} while connected");
                continue;
            }
            let h = packet.header;
            if loss.should_drop(h.flags) {
                log::info!("[server] simulating loss, dropped seq={}", h.seq);
                continue;
            }
            if h.flags == flags::FIN {
                break h.seq;
            }

            // Anything short of a FIN is data, flagged or not; a duplicated
            // handshake confirm lands here as an empty in-order segment.
            match reorder.on_data(h.seq, &packet.payload) {
                DataOutcome::InOrder { delivered } => log::debug!(
                    "[server] seq={} in order, delivered {delivered} segment(s), cursor={}",
                    h.seq,
                    reorder.expected()
                ),
                DataOutcome::Buffered => log::debug!(
                    "[server] seq={} ahead of cursor {}, parked ({} waiting)",
                    h.seq,
                    reorder.expected(),
                    reorder.parked()
                ),
                DataOutcome::DuplicateBuffered => {
                    log::debug!("[server] seq={} duplicate of a parked segment", h.seq)
                }
                DataOutcome::DuplicateDelivered => {
                    log::debug!("[server] seq={} already delivered, re-acking", h.seq)
                }
            }
            self.socket.send_to(&build_ack(reorder.expected()), peer).await?;
            log::debug!("[server] cumulative ack {} sent", reorder.expected());
        };

        // Teardown: FIN-ACK, then a bounded wait for the peer's last ACK.
        log::info!("[server] fin received from {peer} (seq={fin_seq})");
        let fin_ack = Packet {
            header: Header {
                seq: 0,
                ack: fin_seq.wrapping_add(1),
                flags: flags::FIN | flags::ACK,
            },
            payload: Vec::new(),
        };
        self.socket.send_to(&fin_ack, peer).await?;
        advance(&mut state, ConnectionState::FinWait);

        let deadline = Instant::now() + self.config.ack_wait_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "[server] no final ack within {:?}, closing anyway",
                    self.config.ack_wait_timeout
                );
                break;
            }
            match time::timeout(deadline - now, self.socket.recv_from()).await {
                Err(_) => {
                    log::warn!(
                        "[server] no final ack within {:?}, closing anyway",
                        self.config.ack_wait_timeout
                    );
                    break;
                }
                Ok(Ok((packet, from))) => {
                    if from == peer && packet.header.flags == flags::ACK {
                        log::info!("[server] final ack received, connection closed");
                        break;
                    }
                    log::debug!(
                        "[server] draining flags={:#05b} from {from} while closing",
                        packet.header.flags
                    );
                }
                Ok(Err(SocketError::Packet(e))) => {
                    log::warn!("[server] dropping malformed datagram: {e}");
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        advance(&mut state, ConnectionState::Closed);

        let summary = ConnSummary {
            peer,
            delivered_bytes: reorder.assembled().len() as u64,
            segments_in_order: reorder.segments_in_order(),
            segments_buffered: reorder.segments_buffered(),
            datagrams_dropped: loss.dropped(),
        };
        log::info!(
            "[server] session with {peer} done: {} bytes delivered, {} segments in order, {} parked on arrival, {} datagrams dropped",
            summary.delivered_bytes,
            summary.segments_in_order,
            summary.segments_buffered,
            summary.datagrams_dropped
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Receive the next decodable packet, logging and skipping malformed
/// datagrams.  I/O errors propagate.
async fn recv_packet(socket: &Socket) -> Result<(Packet, SocketAddr), ServerError> {
    loop {
        match socket.recv_from().await {
            Ok(pair) => return Ok(pair),
            Err(SocketError::Packet(e)) => {
                log::warn!("[server] dropping malformed datagram: {e}");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn build_syn_ack(server_isn: u32, client_isn: u32) -> Packet {
    Packet {
        header: Header {
            seq: server_isn,
            ack: client_isn.wrapping_add(1),
            flags: flags::SYN | flags::ACK,
        },
        payload: Vec::new(),
    }
}

/// Cumulative ACK for everything below `expected`.
///
/// The payload is the server's Unix time as a big-endian `f64`; peers may
/// ignore it.
fn build_ack(expected: u32) -> Packet {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    Packet {
        header: Header {
            seq: 0,
            ack: expected,
            flags: flags::ACK,
        },
        payload: stamp.to_be_bytes().to_vec(),
    }
}

fn advance(state: &mut ConnectionState, next: ConnectionState) {
    log::debug!("[server] state {state} -> {next}");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_carries_clock_payload() {
        let ack = build_ack(512);
        assert_eq!(ack.header.flags, flags::ACK);
        assert_eq!(ack.header.ack, 512);
        assert_eq!(ack.header.seq, 0);
        assert_eq!(ack.payload.len(), 8);

        let bytes: [u8; 8] = ack.payload.as_slice().try_into().unwrap();
        let stamp = f64::from_be_bytes(bytes);
        assert!(stamp > 0.0);
    }

    #[test]
    fn default_config_matches_reference_server() {
        let c = ServerConfig::default();
        assert_eq!(c.bind_addr.port(), 11111);
        assert!((c.loss_rate - 0.3).abs() < 1e-9);
        assert_eq!(c.ack_wait_timeout, Duration::from_secs(5));
        assert!(c.loss_seed.is_none());
    }
}
