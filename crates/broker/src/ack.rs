//! Bidirectional acknowledgement engine.
//!
//! Outbound (broker → client): monotone sequence allocation with a
//! pending set drained by cumulative client acks. Inbound (client →
//! broker): strict in-order processing with a reorder buffer — frames
//! arriving ahead of the expected sequence wait until the gap fills.
//!
//! States are keyed by an opaque scope string: the tab id for frames the
//! handlers exchange directly with the client, the session id for frames
//! the session manager fans out.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::Mutex;
use serde_json::Value;
use tether_protocol::{InboundSync, OutboundSync, SyncSnapshot};

/// Per-scope sequencing state.
#[derive(Debug)]
struct AckState {
    /// Next outbound seq to allocate.
    next_outbound_seq: u64,
    /// Highest outbound seq the client has acknowledged.
    client_last_acked: i64,
    /// Highest inbound seq we have acknowledged back to the client.
    /// Inbound numbering starts at 1, so 0 means "nothing yet".
    last_sent_ack: u64,
    /// Outbound seqs not yet acknowledged.
    pending_outbound: BTreeSet<u64>,
    /// Inbound frames that arrived ahead of the expected sequence.
    reorder_buffer: BTreeMap<u64, Value>,
}

impl Default for AckState {
    fn default() -> Self {
        Self {
            next_outbound_seq: 0,
            client_last_acked: -1,
            last_sent_ack: 0,
            pending_outbound: BTreeSet::new(),
            reorder_buffer: BTreeMap::new(),
        }
    }
}

impl AckState {
    fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            is_synced: self.pending_outbound.is_empty() && self.reorder_buffer.is_empty(),
            broker_to_ios: OutboundSync {
                next_seq: self.next_outbound_seq,
                last_acked: self.client_last_acked,
                pending_count: self.pending_outbound.len(),
            },
            ios_to_broker: InboundSync {
                next_seq: self.last_sent_ack + 1,
                last_sent_ack: self.last_sent_ack as i64,
                pending_count: self.reorder_buffer.len(),
            },
        }
    }
}

/// One inbound frame released by [`AckEngine::process`].
#[derive(Debug)]
pub struct ReadyFrame {
    pub seq: u64,
    pub is_duplicate: bool,
    /// The frame to execute now. `None` for duplicates (re-acked, never
    /// re-executed).
    pub frame: Option<Value>,
}

/// Reconnect bookkeeping handed to the session handler.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectInfo {
    pub missed_count: usize,
    pub next_expected_seq: u64,
}

/// Engine tracking ack state for every scope.
#[derive(Default)]
pub struct AckEngine {
    states: Mutex<HashMap<String, AckState>>,
}

impl AckEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next outbound sequence number and mark it pending.
    pub fn next_seq(&self, scope: &str) -> u64 {
        let mut states = self.states.lock();
        let state = states.entry(scope.to_string()).or_default();
        let seq = state.next_outbound_seq;
        state.next_outbound_seq += 1;
        state.pending_outbound.insert(seq);
        seq
    }

    /// Cumulative ack from the client: clears every pending outbound seq
    /// `<= seq`. Returns how many were cleared.
    pub fn ack_from_client(&self, scope: &str, seq: u64) -> usize {
        let mut states = self.states.lock();
        let state = states.entry(scope.to_string()).or_default();
        let still_pending = state.pending_outbound.split_off(&(seq + 1));
        let cleared = state.pending_outbound.len();
        state.pending_outbound = still_pending;
        if seq as i64 > state.client_last_acked {
            state.client_last_acked = seq as i64;
        }
        if cleared > 0 {
            tracing::debug!(scope, seq, cleared, "client acknowledged outbound frames");
        }
        cleared
    }

    /// Highest outbound seq the client has acknowledged (-1 when none).
    pub fn client_last_acked(&self, scope: &str) -> i64 {
        let mut states = self.states.lock();
        states.entry(scope.to_string()).or_default().client_last_acked
    }

    /// Process an inbound frame with ordering. In-order frames drain any
    /// contiguous reorder-buffer prefix behind them; early frames are
    /// buffered and nothing is returned (no ack yet); old frames come
    /// back as duplicates to re-ack without re-executing.
    pub fn process(&self, scope: &str, client_seq: u64, frame: Value) -> Vec<ReadyFrame> {
        let mut states = self.states.lock();
        let state = states.entry(scope.to_string()).or_default();

        if client_seq != 0 && client_seq <= state.last_sent_ack {
            tracing::debug!(scope, client_seq, "duplicate inbound frame");
            return vec![ReadyFrame {
                seq: client_seq,
                is_duplicate: true,
                frame: None,
            }];
        }

        let expected = state.last_sent_ack + 1;
        if client_seq == expected {
            let mut ready = vec![ReadyFrame {
                seq: client_seq,
                is_duplicate: false,
                frame: Some(frame),
            }];
            state.last_sent_ack = client_seq;

            // Drain the contiguous prefix now unblocked.
            while let Some(buffered) = state.reorder_buffer.remove(&(state.last_sent_ack + 1)) {
                state.last_sent_ack += 1;
                tracing::info!(scope, seq = state.last_sent_ack, "released buffered frame");
                ready.push(ReadyFrame {
                    seq: state.last_sent_ack,
                    is_duplicate: false,
                    frame: Some(buffered),
                });
            }
            ready
        } else {
            tracing::warn!(
                scope,
                client_seq,
                expected,
                "inbound sequence gap, buffering frame"
            );
            state.reorder_buffer.insert(client_seq, frame);
            Vec::new()
        }
    }

    /// Reset inbound tracking for a reconnecting client (it restarts its
    /// numbering at 1). Outbound tracking is deliberately untouched:
    /// replay is driven by the client's reported last-received seq.
    pub fn reset_inbound(&self, scope: &str) {
        let mut states = self.states.lock();
        let state = states.entry(scope.to_string()).or_default();
        tracing::info!(scope, "resetting inbound sequence tracking");
        state.last_sent_ack = 0;
        state.reorder_buffer.clear();
    }

    pub fn sync_status(&self, scope: &str) -> SyncSnapshot {
        let mut states = self.states.lock();
        states.entry(scope.to_string()).or_default().snapshot()
    }

    /// What a reconnecting client missed, by its own account.
    pub fn reconnect_info(&self, scope: &str, last_received_seq: i64) -> ReconnectInfo {
        let mut states = self.states.lock();
        let state = states.entry(scope.to_string()).or_default();
        let next = state.next_outbound_seq as i64;
        let missed = (next - (last_received_seq + 1)).max(0) as usize;
        ReconnectInfo {
            missed_count: missed,
            next_expected_seq: state.next_outbound_seq,
        }
    }

    /// Drop all state for a scope (session destroy).
    pub fn remove(&self, scope: &str) {
        self.states.lock().remove(scope);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_seqs_start_at_zero_and_increment() {
        let engine = AckEngine::new();
        assert_eq!(engine.next_seq("t1"), 0);
        assert_eq!(engine.next_seq("t1"), 1);
        assert_eq!(engine.next_seq("t2"), 0);
    }

    #[test]
    fn cumulative_ack_clears_prefix() {
        let engine = AckEngine::new();
        for _ in 0..5 {
            engine.next_seq("t1");
        }
        assert_eq!(engine.ack_from_client("t1", 2), 3);
        let sync = engine.sync_status("t1");
        assert_eq!(sync.broker_to_ios.pending_count, 2);
        assert_eq!(sync.broker_to_ios.last_acked, 2);
        assert_eq!(engine.client_last_acked("t1"), 2);
    }

    #[test]
    fn in_order_frames_release_immediately() {
        let engine = AckEngine::new();
        let ready = engine.process("t1", 1, json!({"n": 1}));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].seq, 1);
        assert!(!ready[0].is_duplicate);
        assert_eq!(ready[0].frame.as_ref().unwrap()["n"], 1);
    }

    #[test]
    fn gap_buffers_until_filled() {
        let engine = AckEngine::new();

        // seq 2 arrives first: buffered, nothing released, no ack.
        assert!(engine.process("t1", 2, json!({"n": 2})).is_empty());

        // seq 1 releases both, in order, with their original frames.
        let ready = engine.process("t1", 1, json!({"n": 1}));
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].seq, 1);
        assert_eq!(ready[1].seq, 2);
        assert_eq!(ready[1].frame.as_ref().unwrap()["n"], 2);
        assert!(ready.iter().all(|r| !r.is_duplicate));
    }

    #[test]
    fn processed_sequence_is_contiguous_prefix() {
        let engine = AckEngine::new();
        let mut released = Vec::new();
        for seq in [3u64, 1, 4, 2, 5] {
            for r in engine.process("t1", seq, json!({"seq": seq})) {
                released.push(r.seq);
            }
        }
        assert_eq!(released, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn duplicates_reack_without_frame() {
        let engine = AckEngine::new();
        engine.process("t1", 1, json!({}));
        let ready = engine.process("t1", 1, json!({}));
        assert_eq!(ready.len(), 1);
        assert!(ready[0].is_duplicate);
        assert!(ready[0].frame.is_none());
    }

    #[test]
    fn reset_inbound_keeps_outbound() {
        let engine = AckEngine::new();
        engine.next_seq("t1");
        engine.next_seq("t1");
        engine.process("t1", 1, json!({}));
        engine.process("t1", 3, json!({})); // buffered

        engine.reset_inbound("t1");
        let sync = engine.sync_status("t1");
        assert_eq!(sync.ios_to_broker.last_sent_ack, 0);
        assert_eq!(sync.ios_to_broker.pending_count, 0);
        // Outbound allocation continues where it left off.
        assert_eq!(engine.next_seq("t1"), 2);

        // Client restarts at 1 and is accepted in-order again.
        let ready = engine.process("t1", 1, json!({}));
        assert_eq!(ready.len(), 1);
        assert!(!ready[0].is_duplicate);
    }

    #[test]
    fn reconnect_info_counts_missed() {
        let engine = AckEngine::new();
        for _ in 0..5 {
            engine.next_seq("s1"); // seqs 0..4
        }
        let info = engine.reconnect_info("s1", 2);
        assert_eq!(info.missed_count, 2); // seqs 3 and 4
        assert_eq!(info.next_expected_seq, 5);

        // Fully caught up.
        assert_eq!(engine.reconnect_info("s1", 4).missed_count, 0);
        // Fresh client that saw nothing.
        assert_eq!(engine.reconnect_info("s1", -1).missed_count, 5);
    }

    #[test]
    fn sync_status_reflects_both_directions() {
        let engine = AckEngine::new();
        assert!(engine.sync_status("t1").is_synced);
        engine.next_seq("t1");
        assert!(!engine.sync_status("t1").is_synced);
        engine.ack_from_client("t1", 0);
        assert!(engine.sync_status("t1").is_synced);
        engine.process("t1", 5, json!({}));
        assert!(!engine.sync_status("t1").is_synced);
    }
}
