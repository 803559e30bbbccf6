//! Receive-side reassembly for one connection.
//!
//! The [`ReorderBuffer`] turns an arbitrary arrival order back into the
//! original byte stream.  It keeps a single cursor, `expected`, which is the
//! sequence number of the next in-order byte; this value doubles as the
//! cumulative ACK the caller sends back after every accepted segment.
//!
//! - A segment landing exactly on the cursor is delivered, then any buffered
//!   successors that now tile contiguously are drained after it.
//! - A segment ahead of the cursor is parked in an out-of-order buffer keyed
//!   by sequence number; a duplicate of a parked segment is ignored.
//! - A segment entirely below the cursor was already delivered; the caller
//!   re-ACKs so the peer can slide its window past a lost ACK.
//!
//! This module only manages state; sockets and ACK construction live with
//! the caller.

use std::collections::HashMap;

use crate::window::{seq_le, seq_lt};

/// What became of one inbound data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOutcome {
    /// Landed on the cursor.  `delivered` counts this segment plus every
    /// buffered successor drained behind it.
    InOrder { delivered: usize },
    /// Ahead of the cursor; parked until the gap fills.
    Buffered,
    /// Ahead of the cursor but already parked; the first copy is kept.
    DuplicateBuffered,
    /// Below the cursor; the data was delivered earlier.
    DuplicateDelivered,
}

/// Reassembles in-order data from out-of-order segment arrivals.
#[derive(Debug)]
pub struct ReorderBuffer {
    /// Sequence number of the next in-order byte (the cumulative ACK value).
    expected: u32,
    /// Segments ahead of the cursor, keyed by sequence number.
    out_of_order: HashMap<u32, Vec<u8>>,
    /// The delivered byte stream, in order.
    assembled: Vec<u8>,
    /// Segments delivered through the cursor, drained ones included.
    segments_in_order: u64,
    /// Segments that spent time parked in the out-of-order buffer.
    segments_buffered: u64,
}

impl ReorderBuffer {
    /// Create a buffer expecting `first_seq` as the first data byte
    /// (the peer's ISN plus one after a handshake).
    pub fn new(first_seq: u32) -> Self {
        Self {
            expected: first_seq,
            out_of_order: HashMap::new(),
            assembled: Vec::new(),
            segments_in_order: 0,
            segments_buffered: 0,
        }
    }

    /// Sequence number of the next in-order byte.  Send this as the
    /// cumulative ACK.
    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// The reassembled byte stream delivered so far.
    pub fn assembled(&self) -> &[u8] {
        &self.assembled
    }

    /// Segments currently parked out of order.
    pub fn parked(&self) -> usize {
        self.out_of_order.len()
    }

    /// Total segments delivered in order, drained ones included.
    pub fn segments_in_order(&self) -> u64 {
        self.segments_in_order
    }

    /// Total segments that arrived ahead of the cursor.
    pub fn segments_buffered(&self) -> u64 {
        self.segments_buffered
    }

    /// Accept one data segment.
    ///
    /// Advances the cursor when `seq` tiles onto it, parks the payload when
    /// `seq` is ahead, and reports a duplicate otherwise.  The caller should
    /// answer every outcome with a cumulative ACK carrying
    /// [`expected`](Self::expected).
    pub fn on_data(&mut self, seq: u32, payload: &[u8]) -> DataOutcome {
        if seq == self.expected {
            self.deliver(payload.to_vec());
            let mut delivered = 1;
            // Drain successors that now tile contiguously onto the cursor.
            while let Some(next) = self.out_of_order.remove(&self.expected) {
                self.deliver(next);
                delivered += 1;
            }
            DataOutcome::InOrder { delivered }
        } else if seq_lt(self.expected, seq) {
            if self.out_of_order.contains_key(&seq) {
                // Retransmitted copy of a parked segment; nothing stored.
                DataOutcome::DuplicateBuffered
            } else {
                self.out_of_order.insert(seq, payload.to_vec());
                self.segments_buffered += 1;
                DataOutcome::Buffered
            }
        } else {
            debug_assert!(seq_le(seq, self.expected));
            DataOutcome::DuplicateDelivered
        }
    }

    fn deliver(&mut self, payload: Vec<u8>) {
        self.expected = self.expected.wrapping_add(payload.len() as u32);
        self.assembled.extend_from_slice(&payload);
        self.segments_in_order += 1;
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// 80-byte payload filled with one repeated letter.
    fn seg(letter: u8) -> Vec<u8> {
        vec![letter; 80]
    }

    #[test]
    fn in_order_advances_cursor() {
        let mut r = ReorderBuffer::new(1001);
        let out = r.on_data(1001, &seg(b'a'));
        assert_eq!(out, DataOutcome::InOrder { delivered: 1 });
        assert_eq!(r.expected(), 1081);
        assert_eq!(r.assembled().len(), 80);
        assert_eq!(r.parked(), 0);
    }

    #[test]
    fn gap_is_buffered_then_drained() {
        let mut r = ReorderBuffer::new(0);
        assert_eq!(r.on_data(0, &seg(b'a')), DataOutcome::InOrder { delivered: 1 });

        // Third segment arrives before the second.
        assert_eq!(r.on_data(160, &seg(b'c')), DataOutcome::Buffered);
        assert_eq!(r.expected(), 80); // cursor unmoved across the gap
        assert_eq!(r.parked(), 1);

        // The gap fills: both come out in one step.
        assert_eq!(r.on_data(80, &seg(b'b')), DataOutcome::InOrder { delivered: 2 });
        assert_eq!(r.expected(), 240);
        assert_eq!(r.parked(), 0);
        assert_eq!(r.assembled(), [seg(b'a'), seg(b'b'), seg(b'c')].concat());
    }

    #[test]
    fn duplicate_below_cursor_reported() {
        let mut r = ReorderBuffer::new(0);
        r.on_data(0, &seg(b'a'));
        r.on_data(80, &seg(b'b'));

        assert_eq!(r.on_data(0, &seg(b'a')), DataOutcome::DuplicateDelivered);
        assert_eq!(r.expected(), 160); // cursor unchanged
        assert_eq!(r.assembled().len(), 160); // nothing delivered twice
        assert_eq!(r.segments_in_order(), 2);
    }

    #[test]
    fn duplicate_of_parked_segment_is_ignored() {
        let mut r = ReorderBuffer::new(0);
        assert_eq!(r.on_data(80, &seg(b'x')), DataOutcome::Buffered);
        assert_eq!(r.on_data(80, &seg(b'y')), DataOutcome::DuplicateBuffered);
        assert_eq!(r.segments_buffered(), 1); // counted once
        assert_eq!(r.parked(), 1);

        r.on_data(0, &seg(b'a'));
        // The copy that arrived first survives the drain.
        assert_eq!(&r.assembled()[80..], &seg(b'x')[..]);
        assert_eq!(r.expected(), 160);
    }

    #[test]
    fn permuted_arrivals_reassemble_the_stream() {
        // Six segments arriving 0,2,5,1,4,3 (by index) must tile back into
        // byte order.
        let letters = [b'a', b'b', b'c', b'd', b'e', b'f'];
        let mut r = ReorderBuffer::new(500);
        let mut buffered = 0;
        for idx in [0usize, 2, 5, 1, 4, 3] {
            let seq = 500 + 80 * idx as u32;
            match r.on_data(seq, &seg(letters[idx])) {
                DataOutcome::Buffered => buffered += 1,
                DataOutcome::InOrder { .. } => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        let expected: Vec<u8> = letters.iter().flat_map(|&l| seg(l)).collect();
        assert_eq!(r.assembled(), expected);
        assert_eq!(r.expected(), 500 + 480);
        assert_eq!(r.segments_in_order(), 6);
        assert_eq!(r.segments_buffered(), buffered);
        assert_eq!(buffered, 3); // indices 2, 5 and 4 ran ahead
        assert_eq!(r.parked(), 0);
    }

    #[test]
    fn drained_segment_counts_once() {
        let mut r = ReorderBuffer::new(0);
        r.on_data(80, &seg(b'b'));
        r.on_data(0, &seg(b'a'));
        assert_eq!(r.segments_in_order(), 2);

        // Late retransmission of the drained segment is a duplicate now.
        assert_eq!(r.on_data(80, &seg(b'b')), DataOutcome::DuplicateDelivered);
        assert_eq!(r.segments_in_order(), 2);
        assert_eq!(r.assembled().len(), 160);
    }

    #[test]
    fn cursor_wraps_with_sequence_space() {
        let start = u32::MAX - 40;
        let mut r = ReorderBuffer::new(start);
        r.on_data(start, &seg(b'a'));
        assert_eq!(r.expected(), start.wrapping_add(80));

        // Next segment sits past the wrap point.
        let next = start.wrapping_add(80);
        assert_eq!(r.on_data(next, &seg(b'b')), DataOutcome::InOrder { delivered: 1 });
        assert_eq!(r.assembled().len(), 160);
    }
}
