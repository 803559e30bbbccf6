//! Go-Back-N send-side state machine.
//!
//! [`SendWindow`] maintains a sliding window bounded in **bytes**: segments
//! may be transmitted while the span from the oldest unacknowledged byte to
//! the end of the next segment fits inside `window_bytes`.
//!
//! # Protocol contract
//!
//! - A segment may enter flight only while
//!   `next_seq + packet_bytes <= send_base + window_bytes`.
//! - ACKs are **cumulative**: `ack = K` means the receiver has accepted all
//!   bytes up to (but not including) sequence number `K`.
//! - On timeout of the oldest pending segment, the caller retransmits
//!   **every** pending segment in the window (go back to N), each with a
//!   refreshed send timestamp.
//! - Each pending segment keeps its send timestamp and ordinal so the first
//!   covering ACK yields one RTT sample per segment.
//! - Sequence numbers are u32 and wrap using standard modular arithmetic;
//!   wrap-around comparisons use the convention that two sequence numbers are
//!   "close" when their difference is less than `u32::MAX / 2`.
//!
//! This module only manages state; all socket I/O and clock reads are the
//! caller's responsibility (timestamps are passed in).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::packet::{Header, Packet};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Returns `true` when sequence number `a` is ≤ `b` in wrap-around space.
///
/// The comparison works correctly as long as the two values are less than
/// `u32::MAX / 2` apart, which is always the case for a reasonable window.
/// Shared with the receive side so both directions order sequence numbers
/// the same way.
#[inline]
pub(crate) fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= (u32::MAX / 2)
}

/// Returns `true` when sequence number `a` is strictly < `b` in wrap-around
/// space.
#[inline]
pub(crate) fn seq_lt(a: u32, b: u32) -> bool {
    a != b && seq_le(a, b)
}

// ---------------------------------------------------------------------------
// PendingSegment / AckedSegment
// ---------------------------------------------------------------------------

/// A transmitted segment awaiting its covering cumulative ACK.
///
/// Lives in the pending map from first transmission until an ACK covers its
/// sequence number; retransmission refreshes `sent_at` in place.
#[derive(Debug, Clone)]
pub struct PendingSegment {
    /// The segment on the wire (ready to re-encode for retransmission).
    pub packet: Packet,
    /// Wall-clock time of the most recent transmission (for RTT sampling).
    pub sent_at: Instant,
    /// 1-based position of this segment in the transfer (for logs).
    pub ordinal: u32,
}

/// One segment newly covered by a cumulative ACK, with its measured RTT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckedSegment {
    pub seq: u32,
    /// 1-based position of the segment in the transfer.
    pub ordinal: u32,
    /// Elapsed time from the most recent transmission to the covering ACK.
    pub rtt: Duration,
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Go-Back-N send-side state for one connection.
///
/// # Sequence-number layout
///
/// ```text
///  send_base          next_seq       send_base + window_bytes
///      │                  │                  │
///  ────┼──────────────────┼──────────────────┼───▶ seq space
///      │ <── in flight ──▶│ <── sendable ──▶ │
/// ```
///
/// Invariant: `send_base ≤ next_seq ≤ send_base + window_bytes`, and
/// `send_base` never moves backwards.
#[derive(Debug)]
pub struct SendWindow {
    /// Sequence number of the **oldest** unacked byte (left window edge).
    pub send_base: u32,

    /// Sequence number to use for the **next** new segment.
    pub next_seq: u32,

    /// Maximum number of bytes that may be in flight simultaneously.
    window_bytes: u32,

    /// Payload size of one data segment in bytes.
    packet_bytes: u16,

    /// In-flight segments keyed by their sequence number.
    pending: HashMap<u32, PendingSegment>,

    /// Data-segment transmissions so far, retransmissions included.
    transmissions: u64,
}

impl SendWindow {
    /// Create a new [`SendWindow`].
    ///
    /// `seq_start` is the first data sequence number (`ISN + 1` after the
    /// handshake).  `window_bytes` bounds the bytes in flight and
    /// `packet_bytes` is the fixed payload size of each data segment.
    pub fn new(seq_start: u32, window_bytes: u32, packet_bytes: u16) -> Self {
        assert!(packet_bytes > 0, "packet_bytes must be at least 1");
        assert!(
            u32::from(packet_bytes) <= window_bytes,
            "window_bytes must fit at least one segment"
        );
        Self {
            send_base: seq_start,
            next_seq: seq_start,
            window_bytes,
            packet_bytes,
            pending: HashMap::new(),
            transmissions: 0,
        }
    }

    /// `true` when one more full segment fits between `next_seq` and the
    /// right window edge.
    pub fn can_send(&self) -> bool {
        seq_le(self.send_base, self.next_seq)
            && seq_le(
                self.next_seq.wrapping_add(u32::from(self.packet_bytes)),
                self.send_base.wrapping_add(self.window_bytes),
            )
    }

    /// Number of segments currently awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// `true` when at least one segment is awaiting acknowledgement.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Total data-segment transmissions so far, retransmissions included.
    pub fn transmissions(&self) -> u64 {
        self.transmissions
    }

    /// Build a data segment with the correct next sequence number.
    ///
    /// Data segments carry no flags and no acknowledgement.  Call
    /// [`record_sent`](Self::record_sent) immediately after to advance
    /// `next_seq` and place the segment into the pending map.
    pub fn next_data_packet(&self, payload: Vec<u8>) -> Packet {
        Packet {
            header: Header {
                seq: self.next_seq,
                ack: 0,
                flags: 0,
            },
            payload,
        }
    }

    /// Place a just-transmitted segment into the pending map and advance
    /// `next_seq` by its payload length.
    ///
    /// `ordinal` is the segment's 1-based position in the transfer, `now` the
    /// transmission timestamp.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if the window has no room.  Check
    /// [`can_send`](Self::can_send) before calling.
    pub fn record_sent(&mut self, packet: Packet, ordinal: u32, now: Instant) {
        debug_assert!(
            self.can_send(),
            "record_sent called on a full window ({} bytes in flight of {})",
            self.next_seq.wrapping_sub(self.send_base),
            self.window_bytes
        );
        let payload_len = packet.payload.len() as u32;
        self.pending.insert(
            packet.header.seq,
            PendingSegment {
                packet,
                sent_at: now,
                ordinal,
            },
        );
        self.next_seq = self.next_seq.wrapping_add(payload_len);
        self.transmissions += 1;
    }

    /// Process a cumulative ACK received at `now`.
    ///
    /// When `ack` lies in `(send_base, next_seq]`: every pending segment with
    /// sequence number in `[send_base, ack)` is removed and reported with its
    /// RTT (measured from the most recent transmission), and `send_base`
    /// advances to `ack`.
    ///
    /// Returns an empty vector for a duplicate ACK (`ack ≤ send_base`) or an
    /// ACK covering data never sent (`ack` beyond `next_seq`); accepting the
    /// latter would break `send_base ≤ next_seq`.  The result is ordered
    /// oldest segment first.
    pub fn on_ack(&mut self, ack: u32, now: Instant) -> Vec<AckedSegment> {
        if !seq_lt(self.send_base, ack) || !seq_le(ack, self.next_seq) {
            return Vec::new();
        }

        let base = self.send_base;
        let covered: Vec<u32> = self
            .pending
            .keys()
            .copied()
            .filter(|&seq| seq_le(base, seq) && seq_lt(seq, ack))
            .collect();

        let mut acked = Vec::with_capacity(covered.len());
        for seq in covered {
            if let Some(segment) = self.pending.remove(&seq) {
                acked.push(AckedSegment {
                    seq,
                    ordinal: segment.ordinal,
                    rtt: now.duration_since(segment.sent_at),
                });
            }
        }
        acked.sort_by_key(|a| a.seq.wrapping_sub(base));

        self.send_base = ack;
        acked
    }

    /// Wall-clock time when the oldest pending segment was last transmitted.
    ///
    /// Returns `None` when nothing is pending (sender is idle).  The
    /// retransmit deadline is this value plus the retransmit timeout.
    pub fn oldest_sent_at(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.sent_at).min()
    }

    /// Go-Back-N step: refresh the send timestamp of every pending segment
    /// inside the window to `now` and return them, oldest first, ready for
    /// retransmission.
    pub fn retransmit_all(&mut self, now: Instant) -> Vec<Packet> {
        let lo = self.send_base;
        let hi = self.send_base.wrapping_add(self.window_bytes);

        let mut due: Vec<&mut PendingSegment> = self
            .pending
            .values_mut()
            .filter(|p| {
                let seq = p.packet.header.seq;
                let end = seq.wrapping_add(p.packet.payload.len() as u32);
                seq_le(lo, seq) && seq_le(end, hi)
            })
            .collect();
        due.sort_by_key(|p| p.packet.header.seq.wrapping_sub(lo));

        let mut packets = Vec::with_capacity(due.len());
        for segment in due {
            segment.sent_at = now;
            packets.push(segment.packet.clone());
        }
        self.transmissions += packets.len() as u64;
        packets
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference geometry: 400-byte window, 80-byte segments.
    fn window(start: u32) -> SendWindow {
        SendWindow::new(start, 400, 80)
    }

    /// Fill the window with as many segments as fit, starting at `ordinal` 1.
    fn fill(w: &mut SendWindow, now: Instant) -> u32 {
        let mut ordinal = 0;
        while w.can_send() {
            ordinal += 1;
            let pkt = w.next_data_packet(vec![b'.'; 80]);
            w.record_sent(pkt, ordinal, now);
        }
        ordinal
    }

    #[test]
    fn initial_state() {
        let w = window(100);
        assert_eq!(w.send_base, 100);
        assert_eq!(w.next_seq, 100);
        assert!(w.can_send());
        assert!(!w.has_pending());
        assert_eq!(w.in_flight(), 0);
        assert_eq!(w.transmissions(), 0);
        assert_eq!(w.oldest_sent_at(), None);
    }

    #[test]
    fn record_sent_advances_next_seq() {
        let mut w = window(0);
        let pkt = w.next_data_packet(vec![0u8; 80]);
        w.record_sent(pkt, 1, Instant::now());

        assert_eq!(w.next_seq, 80);
        assert_eq!(w.send_base, 0); // not acked yet
        assert_eq!(w.in_flight(), 1);
        assert_eq!(w.transmissions(), 1);
    }

    #[test]
    fn byte_window_caps_segments_in_flight() {
        // 400-byte window with 80-byte segments: exactly 5 fit.
        let mut w = window(1001);
        let sent = fill(&mut w, Instant::now());
        assert_eq!(sent, 5);
        assert!(!w.can_send());
        assert_eq!(w.in_flight(), 5);
        assert_eq!(w.next_seq, 1001 + 400);
    }

    #[test]
    fn ack_slides_window_and_samples_rtt() {
        let mut w = window(0);
        let t0 = Instant::now();
        let pkt = w.next_data_packet(vec![0u8; 80]);
        w.record_sent(pkt, 1, t0);

        let acked = w.on_ack(80, t0 + Duration::from_millis(30));
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0].seq, 0);
        assert_eq!(acked[0].ordinal, 1);
        assert_eq!(acked[0].rtt, Duration::from_millis(30));
        assert_eq!(w.send_base, 80);
        assert!(!w.has_pending());
    }

    #[test]
    fn cumulative_ack_covers_multiple_segments() {
        let mut w = window(0);
        let t0 = Instant::now();
        fill(&mut w, t0);

        // One ACK for the first three segments.
        let acked = w.on_ack(240, t0 + Duration::from_millis(10));
        assert_eq!(acked.len(), 3);
        let seqs: Vec<u32> = acked.iter().map(|a| a.seq).collect();
        assert_eq!(seqs, vec![0, 80, 160]); // oldest first
        assert_eq!(w.send_base, 240);
        assert_eq!(w.in_flight(), 2);
        assert!(w.can_send()); // room opened up
    }

    #[test]
    fn duplicate_ack_ignored() {
        let mut w = window(0);
        let t0 = Instant::now();
        let pkt = w.next_data_packet(vec![0u8; 80]);
        w.record_sent(pkt, 1, t0);

        assert_eq!(w.on_ack(80, t0).len(), 1);
        // Same ACK again: nothing newly covered, base unchanged.
        assert!(w.on_ack(80, t0).is_empty());
        assert_eq!(w.send_base, 80);
    }

    #[test]
    fn stale_ack_ignored() {
        let mut w = window(200);
        let t0 = Instant::now();
        fill(&mut w, t0);
        w.on_ack(360, t0);

        // ACK below the current base must not move the window backwards.
        assert!(w.on_ack(280, t0).is_empty());
        assert_eq!(w.send_base, 360);
    }

    #[test]
    fn ack_beyond_next_seq_ignored() {
        let mut w = window(0);
        let t0 = Instant::now();
        let pkt = w.next_data_packet(vec![0u8; 80]);
        w.record_sent(pkt, 1, t0);

        // ACK for data never sent: window untouched.
        assert!(w.on_ack(5000, t0).is_empty());
        assert_eq!(w.send_base, 0);
        assert_eq!(w.in_flight(), 1);
    }

    #[test]
    fn partial_cumulative_ack_leaves_tail_pending() {
        let mut w = window(0);
        let t0 = Instant::now();
        fill(&mut w, t0);

        let acked = w.on_ack(160, t0);
        assert_eq!(acked.len(), 2);
        assert_eq!(w.send_base, 160);
        assert_eq!(w.in_flight(), 3);
    }

    #[test]
    fn retransmit_returns_all_pending_oldest_first() {
        let mut w = window(0);
        let t0 = Instant::now();
        fill(&mut w, t0);
        w.on_ack(80, t0); // first segment acked, four remain

        let later = t0 + Duration::from_millis(600);
        let pkts = w.retransmit_all(later);
        assert_eq!(pkts.len(), 4);
        let seqs: Vec<u32> = pkts.iter().map(|p| p.header.seq).collect();
        assert_eq!(seqs, vec![80, 160, 240, 320]);
        // 5 first sends + 4 resends.
        assert_eq!(w.transmissions(), 9);
    }

    #[test]
    fn retransmit_refreshes_send_timestamps() {
        let mut w = window(0);
        let t0 = Instant::now();
        fill(&mut w, t0);

        let later = t0 + Duration::from_millis(600);
        w.retransmit_all(later);
        assert_eq!(w.oldest_sent_at(), Some(later));

        // RTT after a retransmission is measured from the resend.
        let acked = w.on_ack(80, later + Duration::from_millis(5));
        assert_eq!(acked[0].rtt, Duration::from_millis(5));
    }

    #[test]
    fn oldest_sent_at_tracks_oldest_pending() {
        let mut w = window(0);
        let t0 = Instant::now();
        let pkt = w.next_data_packet(vec![0u8; 80]);
        w.record_sent(pkt, 1, t0);
        let pkt = w.next_data_packet(vec![0u8; 80]);
        w.record_sent(pkt, 2, t0 + Duration::from_millis(10));

        assert_eq!(w.oldest_sent_at(), Some(t0));
        // Acking the first leaves the younger stamp as oldest.
        w.on_ack(80, t0 + Duration::from_millis(20));
        assert_eq!(w.oldest_sent_at(), Some(t0 + Duration::from_millis(10)));
    }

    #[test]
    fn send_base_is_monotonic() {
        let mut w = window(0);
        let t0 = Instant::now();
        fill(&mut w, t0);

        let mut last = w.send_base;
        for ack in [80, 80, 40, 240, 160, 400] {
            w.on_ack(ack, t0);
            assert!(
                w.next_seq.wrapping_sub(w.send_base) <= u32::MAX / 2,
                "send_base overtook next_seq"
            );
            assert!(
                w.send_base.wrapping_sub(last) <= u32::MAX / 2,
                "send_base moved backwards"
            );
            last = w.send_base;
        }
        assert_eq!(w.send_base, 400);
    }

    #[test]
    fn seq_wrap_around() {
        // Start close to u32::MAX so that sequence numbers wrap.
        let start = u32::MAX - 100;
        let mut w = window(start);
        let t0 = Instant::now();
        let sent = fill(&mut w, t0);
        assert_eq!(sent, 5);
        assert_eq!(w.next_seq, start.wrapping_add(400));

        let expected_ack = start.wrapping_add(160);
        let acked = w.on_ack(expected_ack, t0);
        assert_eq!(acked.len(), 2);
        assert_eq!(w.send_base, expected_ack);
    }
}
