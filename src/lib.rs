//! `gbn-over-udp` — a miniature TCP over UDP: three-message handshake,
//! Go-Back-N reliability with cumulative ACKs, and a graceful FIN exchange,
//! with a server-side loss simulator to make the retransmission machinery
//! earn its keep.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  data segments   ┌────────────┐
//!  │   Client   │─────────────────▶│   Server   │
//!  │ SendWindow │                  │ Reorder-   │
//!  │ + listener │◀─────────────────│ Buffer +   │
//!  └─────┬──────┘  cumulative ACKs │ LossModel  │
//!        │                         └─────┬──────┘
//!        │      raw UDP datagrams        │
//!  ┌─────▼─────────────────────────────── ▼─────┐
//!  │    Socket (tokio UdpSocket + codec)        │
//!  └────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]   — wire format (12-byte header, flags, encode / decode)
//! - [`state`]    — connection lifecycle states
//! - [`window`]   — Go-Back-N send window (byte-bounded, pure state)
//! - [`receiver`] — in-order reassembly of out-of-order arrivals
//! - [`loss`]     — simulated datagram loss with exempt control flags
//! - [`stats`]    — RTT samples and the end-of-session report
//! - [`client`]   — connect, windowed transfer, teardown
//! - [`server`]   — accept, reassemble and ACK, teardown
//! - [`socket`]   — async UDP socket abstraction

pub mod client;
pub mod loss;
pub mod packet;
pub mod receiver;
pub mod server;
pub mod socket;
pub mod state;
pub mod stats;
pub mod window;
