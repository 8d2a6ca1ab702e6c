//! Reliable Command Delivery over UDP
//!
//! Both halves of the at-least-once command channel: the client-side
//! sequencer that numbers and retransmits commands, and the server-side
//! dedup table that keeps retransmissions from being applied twice.
//! Acks themselves are unsequenced and never retried.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

/// Retransmit an unacked command after this long.
pub const RESEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Give up on a command after this many retransmissions.
pub const MAX_RESENDS: u32 = 3;

// =============================================================================
// CLIENT HALF
// =============================================================================

#[derive(Clone, Debug)]
struct PendingCommand<T> {
    command: T,
    sent_at: Instant,
    resends: u32,
}

/// What the retry sweep decided for the pending queue.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RetrySweep<T> {
    /// Commands due for retransmission, with their sequence numbers
    pub resend: Vec<(u32, T)>,
    /// Sequence numbers abandoned after exhausting retries
    pub abandoned: Vec<u32>,
}

/// Client-side command sequencer and retry queue.
///
/// Sequence numbers are strictly increasing from 1 for the lifetime of
/// a session. The caller transmits; this type only tracks.
#[derive(Debug)]
pub struct CommandSequencer<T> {
    next_seq: u32,
    pending: BTreeMap<u32, PendingCommand<T>>,
}

impl<T: Clone> CommandSequencer<T> {
    /// Empty sequencer starting at sequence 1.
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            pending: BTreeMap::new(),
        }
    }

    /// Register a command for transmission, returning its sequence
    /// number.
    pub fn track(&mut self, command: T, now: Instant) -> u32 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(
            seq,
            PendingCommand {
                command,
                sent_at: now,
                resends: 0,
            },
        );
        seq
    }

    /// Process a received ack. Returns whether the sequence was
    /// outstanding.
    pub fn acknowledge(&mut self, seq: u32) -> bool {
        self.pending.remove(&seq).is_some()
    }

    /// Sweep the pending queue: collect commands due for retransmission
    /// and drop those past the retry cap.
    pub fn poll_retries(&mut self, now: Instant) -> RetrySweep<T> {
        let mut sweep = RetrySweep {
            resend: Vec::new(),
            abandoned: Vec::new(),
        };

        let due: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.sent_at) >= RESEND_TIMEOUT)
            .map(|(seq, _)| *seq)
            .collect();

        for seq in due {
            let pending = match self.pending.get_mut(&seq) {
                Some(p) => p,
                None => continue,
            };
            if pending.resends >= MAX_RESENDS {
                self.pending.remove(&seq);
                sweep.abandoned.push(seq);
            } else {
                pending.resends += 1;
                pending.sent_at = now;
                sweep.resend.push((seq, pending.command.clone()));
            }
        }

        sweep
    }

    /// Number of commands awaiting an ack.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

impl<T: Clone> Default for CommandSequencer<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERVER HALF
// =============================================================================

/// Server-side processed-command table, keyed by session token.
///
/// A sequence number present here has been applied; retransmissions
/// are re-acked without reapplying. Rejected commands are never marked,
/// so their retries fail identically.
#[derive(Debug, Default)]
pub struct CommandDedup {
    processed: BTreeMap<String, BTreeSet<u32>>,
}

impl CommandDedup {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `seq` from `token` has already been applied.
    pub fn is_duplicate(&self, token: &str, seq: u32) -> bool {
        self.processed
            .get(token)
            .map(|set| set.contains(&seq))
            .unwrap_or(false)
    }

    /// Record `seq` from `token` as applied.
    pub fn mark(&mut self, token: &str, seq: u32) {
        self.processed.entry(token.to_string()).or_default().insert(seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_start_at_one_and_increase() {
        let now = Instant::now();
        let mut seq = CommandSequencer::new();
        assert_eq!(seq.track("a", now), 1);
        assert_eq!(seq.track("b", now), 2);
        assert_eq!(seq.outstanding(), 2);
    }

    #[test]
    fn test_ack_clears_pending() {
        let now = Instant::now();
        let mut seq = CommandSequencer::new();
        let s = seq.track("deploy", now);
        assert!(seq.acknowledge(s));
        assert!(!seq.acknowledge(s));
        assert_eq!(seq.outstanding(), 0);
    }

    #[test]
    fn test_retry_after_timeout() {
        let now = Instant::now();
        let mut seq = CommandSequencer::new();
        seq.track("deploy", now);

        // Not due yet.
        let sweep = seq.poll_retries(now + Duration::from_millis(500));
        assert!(sweep.resend.is_empty());

        let sweep = seq.poll_retries(now + Duration::from_secs(1));
        assert_eq!(sweep.resend.len(), 1);
        assert_eq!(sweep.resend[0].0, 1);
    }

    #[test]
    fn test_give_up_after_max_resends() {
        let mut now = Instant::now();
        let mut seq = CommandSequencer::new();
        seq.track("deploy", now);

        for _ in 0..MAX_RESENDS {
            now += RESEND_TIMEOUT;
            let sweep = seq.poll_retries(now);
            assert_eq!(sweep.resend.len(), 1);
            assert!(sweep.abandoned.is_empty());
        }

        now += RESEND_TIMEOUT;
        let sweep = seq.poll_retries(now);
        assert!(sweep.resend.is_empty());
        assert_eq!(sweep.abandoned, vec![1]);
        assert_eq!(seq.outstanding(), 0);
    }

    #[test]
    fn test_dedup_per_token() {
        let mut dedup = CommandDedup::new();
        dedup.mark("token-a", 1);
        assert!(dedup.is_duplicate("token-a", 1));
        assert!(!dedup.is_duplicate("token-a", 2));
        assert!(!dedup.is_duplicate("token-b", 1));
    }
}
