//! Sending side of the protocol: connect, stream, tear down.
//!
//! A [`Client`] performs the three-message handshake, pushes a fixed number
//! of data segments through a Go-Back-N window, then closes the connection
//! with a FIN exchange and returns a [`SessionReport`].
//!
//! # Task layout
//!
//! ```text
//!            ┌────────────────────┐   Mutex<Transfer>   ┌──────────────────┐
//!            │  sender loop       │◀───────────────────▶│  ack_listener    │
//!            │  (run)             │                     │  (spawned task)  │
//!            │  fill window,      │  watch: all acked   │  recv ACKs,      │
//!            │  retransmit on     │◀────────────────────│  slide window,   │
//!            │  timeout           │  mpsc: window moved │  sample RTT      │
//!            └────────────────────┘◀────────────────────└──────────────────┘
//! ```
//!
//! The two tasks share one `Mutex<Transfer>` holding the send window and the
//! RTT samples; the lock is never held across an `await`.  A pending entry
//! is recorded *before* its datagram leaves the socket, so an ACK racing the
//! send always finds the segment it covers.  Between sends the sender parks
//! in `tokio::select!` on three wake-ups: the completion flag, a
//! window-advanced notification, and the retransmit deadline of the oldest
//! pending segment.
//!
//! Server ACKs carry an 8-byte timestamp payload; the client never parses
//! it.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time;

use crate::packet::{flags, Header, Packet};
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;
use crate::stats::SessionReport;
use crate::window::SendWindow;

// ---------------------------------------------------------------------------
// Tuning constants
// ---------------------------------------------------------------------------

/// Data segments per session.
const DEFAULT_SEGMENTS: u32 = 30;
/// Bytes allowed in flight at once.
const DEFAULT_WINDOW_BYTES: u32 = 400;
/// Payload bytes per data segment.
const DEFAULT_PACKET_BYTES: u16 = 80;
/// Oldest-pending age that triggers a full-window retransmission.
const RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(500);
/// How long the handshake waits for the SYN-ACK.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
/// How long teardown waits for the FIN-ACK.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// Receive slice after which the listener re-checks its shutdown flag.
const LISTENER_POLL: Duration = Duration::from_millis(100);
/// Grace period letting the final teardown ACK clear the link before the
/// socket closes.
const CLOSE_LINGER: Duration = Duration::from_millis(100);
/// Initial sequence numbers are drawn from `0..=ISN_MAX`.
const ISN_MAX: u32 = 1500;

// ---------------------------------------------------------------------------
// Configuration and errors
// ---------------------------------------------------------------------------

/// Knobs for one client session.  `Default` gives the standard
/// 30-segment, 400-byte-window transfer.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub total_segments: u32,
    pub window_bytes: u32,
    pub packet_bytes: u16,
    pub retransmit_timeout: Duration,
    pub handshake_timeout: Duration,
    pub teardown_timeout: Duration,
    /// Fixed ISN instead of a random one; used by tests that need to predict
    /// sequence numbers.
    pub initial_seq: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            total_segments: DEFAULT_SEGMENTS,
            window_bytes: DEFAULT_WINDOW_BYTES,
            packet_bytes: DEFAULT_PACKET_BYTES,
            retransmit_timeout: RETRANSMIT_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            teardown_timeout: TEARDOWN_TIMEOUT,
            initial_seq: None,
        }
    }
}

/// Errors surfaced by a client session.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket failure: {0}")]
    Socket(#[from] SocketError),
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("ack listener stopped unexpectedly")]
    ListenerStopped,
}

// ---------------------------------------------------------------------------
// Shared transfer state
// ---------------------------------------------------------------------------

/// State shared between the sender loop and the ACK listener.
///
/// Guarded by a [`Mutex`]; neither task holds the lock across an `await`.
#[derive(Debug)]
struct Transfer {
    window: SendWindow,
    rtt: Vec<Duration>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A connected client, produced by [`Client::connect`].
#[derive(Debug)]
pub struct Client {
    socket: Arc<Socket>,
    server: SocketAddr,
    config: ClientConfig,
    isn: u32,
    state: ConnectionState,
}

impl Client {
    /// Perform the three-message handshake with `server`.
    ///
    /// Sends `SYN(seq = ISN)`, waits up to `handshake_timeout` for a reply
    /// whose flags are exactly `SYN|ACK` and whose ack equals `ISN + 1`, then
    /// confirms with `ACK(seq = ISN + 1, ack = peer_seq + 1)`.  A timeout or
    /// any other reply fails the handshake.
    pub async fn connect(server: SocketAddr, config: ClientConfig) -> Result<Self, ClientError> {
        let bind_addr: SocketAddr = match server {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = Socket::bind(bind_addr).await?;

        let isn = config
            .initial_seq
            .unwrap_or_else(|| rand::rng().random_range(0..=ISN_MAX));

        let syn = Packet {
            header: Header {
                seq: isn,
                ack: 0,
                flags: flags::SYN,
            },
            payload: Vec::new(),
        };
        socket.send_to(&syn, server).await?;
        log::info!("[client] syn sent to {server}, isn={isn}");

        let mut client = Self {
            socket: Arc::new(socket),
            server,
            config,
            isn,
            state: ConnectionState::SynSent,
        };

        let reply = match time::timeout(client.config.handshake_timeout, client.socket.recv_from())
            .await
        {
            Err(_) => {
                return Err(ClientError::HandshakeFailed(format!(
                    "no syn-ack within {:?}",
                    client.config.handshake_timeout
                )))
            }
            Ok(Err(SocketError::Packet(e))) => {
                return Err(ClientError::HandshakeFailed(format!(
                    "malformed reply: {e}"
                )))
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok((packet, from))) => {
                if from != server {
                    return Err(ClientError::HandshakeFailed(format!(
                        "reply from unexpected peer {from}"
                    )));
                }
                packet
            }
        };

        let h = reply.header;
        if h.flags != (flags::SYN | flags::ACK) || h.ack != isn.wrapping_add(1) {
            return Err(ClientError::HandshakeFailed(format!(
                "unexpected reply: flags={:#05b} ack={} (wanted syn-ack with ack={})",
                h.flags,
                h.ack,
                isn.wrapping_add(1)
            )));
        }

        let confirm = Packet {
            header: Header {
                seq: isn.wrapping_add(1),
                ack: h.seq.wrapping_add(1),
                flags: flags::ACK,
            },
            payload: Vec::new(),
        };
        client.socket.send_to(&confirm, server).await?;
        client.transition(ConnectionState::Established);
        log::info!("[client] connected to {server}, peer seq={}", h.seq);
        Ok(client)
    }

    /// Run the data transfer and teardown, consuming the client.
    ///
    /// Returns the [`SessionReport`] once every segment has been
    /// acknowledged and the connection is closed.
    pub async fn run(mut self) -> Result<SessionReport, ClientError> {
        let total = self.config.total_segments;
        let first_seq = self.isn.wrapping_add(1);

        if total == 0 {
            self.teardown(first_seq).await?;
            return Ok(SessionReport::new(0, 0, Vec::new()));
        }

        // One past the last data byte; reaching it means everything is acked
        // and it doubles as the FIN sequence number.
        let end_seq = first_seq
            .wrapping_add(total.wrapping_mul(u32::from(self.config.packet_bytes)));

        let shared = Arc::new(Mutex::new(Transfer {
            window: SendWindow::new(first_seq, self.config.window_bytes, self.config.packet_bytes),
            rtt: Vec::new(),
        }));
        let active = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = watch::channel(false);
        let (advanced_tx, advanced_rx) = mpsc::channel::<()>(32);

        let listener = tokio::spawn(ack_listener(
            Arc::clone(&self.socket),
            self.server,
            Arc::clone(&shared),
            Arc::clone(&active),
            advanced_tx,
            done_tx,
            end_seq,
        ));

        let outcome = self
            .stream_segments(&shared, done_rx, advanced_rx, end_seq)
            .await;

        // The listener is stopped and joined on success and failure alike;
        // left running it would hold the socket and swallow the FIN-ACK.
        active.store(false, Ordering::Release);
        let _ = listener.await;
        outcome?;

        let (transmissions, rtt_samples) = {
            let t = shared.lock().unwrap();
            (t.window.transmissions(), t.rtt.clone())
        };
        log::info!(
            "[client] transfer complete: {total} segments in {transmissions} transmissions"
        );

        self.teardown(end_seq).await?;
        Ok(SessionReport::new(
            u64::from(total),
            transmissions,
            rtt_samples,
        ))
    }

    /// Data phase: keep the window full, park until an ACK moves the base
    /// or the retransmit deadline passes, resend the whole window on
    /// timeout.  Returns once `end_seq` is acknowledged.
    async fn stream_segments(
        &self,
        shared: &Arc<Mutex<Transfer>>,
        mut done_rx: watch::Receiver<bool>,
        mut advanced_rx: mpsc::Receiver<()>,
        end_seq: u32,
    ) -> Result<(), ClientError> {
        let total = self.config.total_segments;
        let packet_bytes = self.config.packet_bytes;
        let rto = self.config.retransmit_timeout;

        let mut next_ordinal: u32 = 1;
        loop {
            // Fill the window with fresh segments.  The pending entry is
            // recorded before the datagram leaves, then the lock is dropped
            // for the actual send.
            while next_ordinal <= total {
                let packet = {
                    let mut t = shared.lock().unwrap();
                    if !t.window.can_send() {
                        break;
                    }
                    let payload = payload_text(next_ordinal, packet_bytes);
                    let packet = t.window.next_data_packet(payload);
                    t.window.record_sent(packet.clone(), next_ordinal, Instant::now());
                    packet
                };
                self.socket.send_to(&packet, self.server).await?;
                log::debug!(
                    "[client] sent segment #{next_ordinal} seq={} len={}",
                    packet.header.seq,
                    packet.payload.len()
                );
                next_ordinal += 1;
            }

            let (finished, deadline) = {
                let t = shared.lock().unwrap();
                (
                    t.window.send_base == end_seq,
                    t.window.oldest_sent_at().map(|oldest| oldest + rto),
                )
            };
            if finished {
                return Ok(());
            }
            // `deadline` can only be None in the instant between an ACK
            // emptying the window and the next fill; fall back to one rto.
            let deadline = deadline.unwrap_or_else(|| Instant::now() + rto);

            tokio::select! {
                changed = done_rx.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::ListenerStopped);
                    }
                }
                advanced = advanced_rx.recv() => {
                    if advanced.is_none() {
                        return Err(ClientError::ListenerStopped);
                    }
                }
                _ = time::sleep_until(time::Instant::from_std(deadline)) => {
                    let packets = {
                        let mut t = shared.lock().unwrap();
                        let now = Instant::now();
                        match t.window.oldest_sent_at() {
                            Some(oldest) if now.duration_since(oldest) >= rto => {
                                t.window.retransmit_all(now)
                            }
                            // An ACK slipped in between the wake-up and the
                            // lock; nothing is due anymore.
                            _ => Vec::new(),
                        }
                    };
                    if !packets.is_empty() {
                        log::info!(
                            "[client] retransmit timeout, resending {} pending segments",
                            packets.len()
                        );
                        for packet in &packets {
                            log::debug!("[client] resent seq={}", packet.header.seq);
                            self.socket.send_to(packet, self.server).await?;
                        }
                    }
                }
            }
        }
    }

    /// Best-effort close: `FIN`, wait for `FIN|ACK`, confirm, linger.
    ///
    /// A missing FIN-ACK is logged and tolerated; the session still counts
    /// as complete because all data was acknowledged before teardown began.
    async fn teardown(&mut self, fin_seq: u32) -> Result<(), ClientError> {
        let fin = Packet {
            header: Header {
                seq: fin_seq,
                ack: 0,
                flags: flags::FIN,
            },
            payload: Vec::new(),
        };
        self.socket.send_to(&fin, self.server).await?;
        self.transition(ConnectionState::FinWait);
        log::info!("[client] fin sent, seq={fin_seq}");

        let deadline = Instant::now() + self.config.teardown_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "[client] no fin-ack within {:?}, closing anyway",
                    self.config.teardown_timeout
                );
                break;
            }
            match time::timeout(deadline - now, self.socket.recv_from()).await {
                Err(_) => {
                    log::warn!(
                        "[client] no fin-ack within {:?}, closing anyway",
                        self.config.teardown_timeout
                    );
                    break;
                }
                Ok(Ok((packet, from))) => {
                    if from != self.server || packet.header.flags != (flags::FIN | flags::ACK) {
                        // Stale data ACKs may still drain here.
                        log::debug!(
                            "[client] ignoring flags={:#05b} from {from} while closing",
                            packet.header.flags
                        );
                        continue;
                    }
                    let confirm = Packet {
                        header: Header {
                            seq: fin_seq.wrapping_add(1),
                            ack: packet.header.ack,
                            flags: flags::ACK,
                        },
                        payload: Vec::new(),
                    };
                    self.socket.send_to(&confirm, self.server).await?;
                    log::info!("[client] fin-ack received, connection closed");
                    // Let the confirmation clear the link before the socket
                    // drops.
                    time::sleep(CLOSE_LINGER).await;
                    break;
                }
                Ok(Err(e)) => {
                    log::warn!("[client] receive error while closing: {e}");
                    continue;
                }
            }
        }
        self.transition(ConnectionState::Closed);
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        log::debug!("[client] state {} -> {next}", self.state);
        self.state = next;
    }
}

// ---------------------------------------------------------------------------
// ACK listener task
// ---------------------------------------------------------------------------

/// Receives cumulative ACKs and slides the shared window.
///
/// Runs until `active` is cleared or the socket fails hard; malformed
/// datagrams are logged and skipped.  The receive is sliced into
/// [`LISTENER_POLL`] chunks so the flag is honored promptly.  Each accepted
/// ACK pushes one RTT sample per newly covered segment, nudges the sender
/// through `advanced`, and flips `done` once the window base reaches
/// `end_seq`.  Returning drops both channel handles, which the sender sees
/// as [`ClientError::ListenerStopped`].
async fn ack_listener(
    socket: Arc<Socket>,
    server: SocketAddr,
    shared: Arc<Mutex<Transfer>>,
    active: Arc<AtomicBool>,
    advanced: mpsc::Sender<()>,
    done: watch::Sender<bool>,
    end_seq: u32,
) {
    while active.load(Ordering::Acquire) {
        let (packet, from) = match time::timeout(LISTENER_POLL, socket.recv_from()).await {
            Err(_) => continue,
            Ok(Err(SocketError::Packet(e))) => {
                log::warn!("[listener] dropping malformed datagram: {e}");
                continue;
            }
            Ok(Err(e)) => {
                log::warn!("[listener] receive failed, stopping: {e}");
                return;
            }
            Ok(Ok(pair)) => pair,
        };
        if from != server {
            log::debug!("[listener] ignoring datagram from unknown peer {from}");
            continue;
        }
        let h = packet.header;
        if h.flags & flags::ACK == 0 {
            log::debug!("[listener] ignoring non-ack, flags={:#05b}", h.flags);
            continue;
        }

        let now = Instant::now();
        let (acked, base) = {
            let mut t = shared.lock().unwrap();
            let acked = t.window.on_ack(h.ack, now);
            for a in &acked {
                t.rtt.push(a.rtt);
            }
            (acked, t.window.send_base)
        };

        if acked.is_empty() {
            log::debug!("[listener] duplicate ack {} (base={base})", h.ack);
            continue;
        }
        for a in &acked {
            log::debug!(
                "[listener] segment #{} acked, rtt {:.3}ms",
                a.ordinal,
                a.rtt.as_secs_f64() * 1000.0
            );
        }
        log::debug!("[listener] ack {} advanced base to {base}", h.ack);

        // A full channel just means the sender already has a wake-up queued.
        let _ = advanced.try_send(());
        if base == end_seq {
            let _ = done.send(true);
        }
    }
    log::debug!("[listener] stopped");
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Payload for segment `ordinal`: `"No.<ordinal> Packet"` padded (or cut)
/// to exactly `len` bytes with `'.'`.
fn payload_text(ordinal: u32, len: u16) -> Vec<u8> {
    let mut text = format!("No.{ordinal} Packet").into_bytes();
    text.resize(usize::from(len), b'.');
    text
}
