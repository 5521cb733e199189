//! Per-session outbound frame buffer.
//!
//! Absorbs disconnects: every outbound frame is appended here before any
//! delivery attempt, so a session with no live connection loses nothing.
//! Replay after reconnect reads `since(last_acked)`.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

/// One buffered outbound frame.
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    pub seq: u64,
    pub content: Value,
    pub acknowledged: bool,
    pub buffered_at: Instant,
    /// Turn correlation ids lifted from the content when present.
    pub turn_id: Option<String>,
    pub parent_turn_id: Option<String>,
}

/// Buffer of outbound frames for every session, with a bounded ring per
/// session and a GC for old acknowledged frames.
pub struct MessageBuffer {
    buffers: Mutex<HashMap<String, VecDeque<BufferedMessage>>>,
    max_messages: usize,
    retention: Duration,
    /// The newest N frames survive the GC regardless of ack state, as a
    /// safety floor for out-of-order acks and reconnect replay.
    keep_floor: usize,
}

impl MessageBuffer {
    pub fn new(max_messages: usize, retention: Duration, keep_floor: usize) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            max_messages,
            retention,
            keep_floor,
        }
    }

    /// Append a frame under the caller-allocated sequence number.
    ///
    /// The ring bound only ever evicts when a producer outruns the
    /// consumer by the full ring; dropping an unacknowledged frame there
    /// is a fatal-class condition for the session and is logged as such.
    pub fn append(&self, session_id: &str, seq: u64, content: Value) {
        let turn_id = content
            .get("turn_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let parent_turn_id = content
            .get("parent_turn_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut buffers = self.buffers.lock();
        let buffer = buffers.entry(session_id.to_string()).or_default();
        if buffer.len() >= self.max_messages {
            if let Some(evicted) = buffer.pop_front() {
                if !evicted.acknowledged {
                    tracing::error!(
                        session_id,
                        seq = evicted.seq,
                        "ring bound evicted an unacknowledged frame; session replay is broken"
                    );
                }
            }
        }
        buffer.push_back(BufferedMessage {
            seq,
            content,
            acknowledged: false,
            buffered_at: Instant::now(),
            turn_id,
            parent_turn_id,
        });
    }

    /// Mark every frame with `seq' <= seq` acknowledged. Returns count.
    pub fn ack_up_to(&self, session_id: &str, seq: u64) -> usize {
        let mut buffers = self.buffers.lock();
        let Some(buffer) = buffers.get_mut(session_id) else {
            return 0;
        };
        let mut count = 0;
        for msg in buffer.iter_mut() {
            if msg.seq <= seq && !msg.acknowledged {
                msg.acknowledged = true;
                count += 1;
            }
        }
        count
    }

    /// Frames with `seq' > seq`, in sequence order, for replay.
    pub fn since(&self, session_id: &str, seq: i64) -> Vec<BufferedMessage> {
        let buffers = self.buffers.lock();
        let Some(buffer) = buffers.get(session_id) else {
            return Vec::new();
        };
        buffer
            .iter()
            .filter(|m| m.seq as i64 > seq)
            .cloned()
            .collect()
    }

    /// Drop everything for a session. Returns how many frames went.
    pub fn clear(&self, session_id: &str) -> usize {
        self.buffers
            .lock()
            .remove(session_id)
            .map(|b| b.len())
            .unwrap_or(0)
    }

    /// Reclaim acknowledged frames older than the retention window.
    /// Unacknowledged frames are never dropped here; the newest
    /// `keep_floor` frames are kept regardless of ack state.
    pub fn sweep(&self) -> usize {
        let mut buffers = self.buffers.lock();
        let mut removed = 0;
        for (session_id, buffer) in buffers.iter_mut() {
            let highest = match buffer.back() {
                Some(m) => m.seq,
                None => continue,
            };
            let floor_seq = highest.saturating_sub(self.keep_floor as u64);
            let before = buffer.len();
            let retention = self.retention;
            buffer.retain(|m| {
                !m.acknowledged || m.buffered_at.elapsed() < retention || m.seq > floor_seq
            });
            let dropped = before - buffer.len();
            if dropped > 0 {
                tracing::debug!(session_id, dropped, "reclaimed acknowledged frames");
                removed += dropped;
            }
        }
        removed
    }

    /// Counts for diagnostics: (sessions, total frames, unacked frames).
    pub fn stats(&self) -> (usize, usize, usize) {
        let buffers = self.buffers.lock();
        let total = buffers.values().map(VecDeque::len).sum();
        let unacked = buffers
            .values()
            .flat_map(|b| b.iter())
            .filter(|m| !m.acknowledged)
            .count();
        (buffers.len(), total, unacked)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn buffer() -> MessageBuffer {
        MessageBuffer::new(1000, Duration::from_secs(300), 100)
    }

    #[test]
    fn append_and_replay_order() {
        let buf = buffer();
        for seq in 0..5u64 {
            buf.append("s1", seq, json!({"seq": seq}));
        }
        let replay = buf.since("s1", 2);
        let seqs: Vec<u64> = replay.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
        assert!(buf.since("s1", 10).is_empty());
        assert_eq!(buf.since("s1", -1).len(), 5);
    }

    #[test]
    fn ack_up_to_is_cumulative() {
        let buf = buffer();
        for seq in 0..4u64 {
            buf.append("s1", seq, json!({}));
        }
        assert_eq!(buf.ack_up_to("s1", 2), 3);
        // Repeat is idempotent.
        assert_eq!(buf.ack_up_to("s1", 2), 0);
        let (_, total, unacked) = buf.stats();
        assert_eq!(total, 4);
        assert_eq!(unacked, 1);
    }

    #[test]
    fn clear_removes_session() {
        let buf = buffer();
        buf.append("s1", 0, json!({}));
        assert_eq!(buf.clear("s1"), 1);
        assert!(buf.since("s1", -1).is_empty());
        assert_eq!(buf.clear("s1"), 0);
    }

    #[test]
    fn ring_bound_evicts_oldest() {
        let buf = MessageBuffer::new(3, Duration::from_secs(300), 2);
        for seq in 0..5u64 {
            buf.append("s1", seq, json!({}));
        }
        let seqs: Vec<u64> = buf.since("s1", -1).iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn sweep_never_drops_unacked() {
        let buf = MessageBuffer::new(1000, Duration::ZERO, 0);
        for seq in 0..10u64 {
            buf.append("s1", seq, json!({}));
        }
        // Nothing acknowledged: zero retention still reclaims nothing.
        assert_eq!(buf.sweep(), 0);
        assert_eq!(buf.since("s1", -1).len(), 10);
    }

    #[test]
    fn sweep_honors_keep_floor() {
        // Zero retention so acknowledged frames are immediately eligible.
        let buf = MessageBuffer::new(1000, Duration::ZERO, 5);
        for seq in 0..10u64 {
            buf.append("s1", seq, json!({}));
        }
        buf.ack_up_to("s1", 9);
        buf.sweep();
        let remaining: Vec<u64> = buf.since("s1", -1).iter().map(|m| m.seq).collect();
        // Highest seq is 9; floor keeps seqs > 9 - 5 = 4.
        assert_eq!(remaining, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn sweep_respects_retention_window() {
        let buf = MessageBuffer::new(1000, Duration::from_secs(3600), 0);
        for seq in 0..4u64 {
            buf.append("s1", seq, json!({}));
        }
        buf.ack_up_to("s1", 3);
        // All acknowledged but young: retained.
        assert_eq!(buf.sweep(), 0);
        assert_eq!(buf.since("s1", -1).len(), 4);
    }

    #[test]
    fn turn_ids_are_lifted() {
        let buf = buffer();
        buf.append("s1", 0, json!({"turn_id": "t-1", "parent_turn_id": "t-0"}));
        let msgs = buf.since("s1", -1);
        assert_eq!(msgs[0].turn_id.as_deref(), Some("t-1"));
        assert_eq!(msgs[0].parent_turn_id.as_deref(), Some("t-0"));
    }
}
