//! Bookkeeping for requests that are waiting for their response.
//!
//! # Correlation without sequence numbers (for beginners)
//!
//! Arcam frames carry no request id.  The only thing a response has in common
//! with the request that caused it is the `(zone, command)` pair, the
//! [`RequestKey`].  The table therefore stores waiters *per key*:
//!
//! - With [`DuplicatePolicy::Reject`] at most one waiter exists per key and a
//!   second registration fails with [`ClientError::DuplicateInFlight`].
//! - With [`DuplicatePolicy::Queue`] waiters for the same key form a FIFO
//!   queue and responses resolve them in registration order.
//!
//! The table is owned by exactly one task (the session actor), so it needs no
//! locking.  Timeouts are driven from the outside by calling
//! [`PendingTable::expire_due`] when [`PendingTable::next_deadline`] passes.

use std::collections::{HashMap, VecDeque};

use arcam_core::{RequestKey, ResponsePacket};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ClientError;

/// What a waiter eventually receives.
pub type ResponseResult = Result<ResponsePacket, ClientError>;

/// Identifies one registration so that it can be cancelled without touching
/// other waiters on the same key.
pub type RequestId = u64;

/// How a second request for an in-flight key is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Fail the newcomer with [`ClientError::DuplicateInFlight`].
    #[default]
    Reject,
    /// Queue the newcomer behind the existing waiter(s).
    Queue,
}

#[derive(Debug)]
struct PendingRequest {
    id: RequestId,
    created_at: Instant,
    deadline: Instant,
    waiter: oneshot::Sender<ResponseResult>,
}

/// Outstanding requests keyed by `(zone, command)`.
#[derive(Debug)]
pub struct PendingTable {
    policy: DuplicatePolicy,
    entries: HashMap<RequestKey, VecDeque<PendingRequest>>,
    next_id: RequestId,
}

impl PendingTable {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Registers a waiter for `key` that times out at `deadline`.
    ///
    /// Returns the registration id and the receiving half of the waiter.
    ///
    /// # Errors
    ///
    /// [`ClientError::DuplicateInFlight`] if `key` already has a waiter and
    /// the policy is [`DuplicatePolicy::Reject`].
    pub fn register(
        &mut self,
        key: RequestKey,
        deadline: Instant,
    ) -> Result<(RequestId, oneshot::Receiver<ResponseResult>), ClientError> {
        let queue = self.entries.entry(key).or_default();
        // Callers that went away without cancelling must not block the key.
        queue.retain(|e| !e.waiter.is_closed());
        if !queue.is_empty() && self.policy == DuplicatePolicy::Reject {
            return Err(ClientError::DuplicateInFlight { key });
        }

        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        queue.push_back(PendingRequest {
            id,
            created_at: Instant::now(),
            deadline,
            waiter: tx,
        });
        debug!(%key, id, queued = queue.len(), "registered pending request");
        Ok((id, rx))
    }

    /// Moves the deadline of registration `id`, e.g. once its frame has
    /// actually been written.  Returns `false` if it is no longer pending.
    pub fn rearm(&mut self, key: RequestKey, id: RequestId, deadline: Instant) -> bool {
        match self
            .entries
            .get_mut(&key)
            .and_then(|q| q.iter_mut().find(|e| e.id == id))
        {
            Some(entry) => {
                entry.deadline = deadline;
                true
            }
            None => false,
        }
    }

    /// `true` while registration `id` is pending and its caller still waits.
    pub fn is_live(&self, key: RequestKey, id: RequestId) -> bool {
        self.entries
            .get(&key)
            .is_some_and(|q| q.iter().any(|e| e.id == id && !e.waiter.is_closed()))
    }

    /// Hands `response` to the oldest live waiter for its key.
    ///
    /// Returns the packet back when nobody was waiting for it, which means it
    /// is unsolicited (or late).  Waiters whose caller has gone away are
    /// skipped and dropped.
    pub fn resolve(&mut self, response: ResponsePacket) -> Option<ResponsePacket> {
        let key = response.key();
        let Some(queue) = self.entries.get_mut(&key) else {
            return Some(response);
        };

        let mut unclaimed = Some(response);
        while let Some(entry) = queue.pop_front() {
            let Some(packet) = unclaimed.take() else {
                break;
            };
            match entry.waiter.send(Ok(packet)) {
                Ok(()) => {
                    debug!(%key, id = entry.id, elapsed = ?entry.created_at.elapsed(), "resolved pending request");
                    break;
                }
                Err(Ok(packet)) => {
                    debug!(%key, id = entry.id, "dropping abandoned pending request");
                    unclaimed = Some(packet);
                }
                Err(Err(_)) => break,
            }
        }
        if queue.is_empty() {
            self.entries.remove(&key);
        }
        unclaimed
    }

    /// Fails every waiter whose deadline is at or before `now` with
    /// [`ClientError::Timeout`].  Returns how many expired.
    pub fn expire_due(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        self.entries.retain(|key, queue| {
            let mut kept = VecDeque::with_capacity(queue.len());
            for entry in queue.drain(..) {
                if entry.deadline > now {
                    kept.push_back(entry);
                } else {
                    debug!(%key, id = entry.id, "pending request timed out");
                    let _ = entry.waiter.send(Err(ClientError::Timeout { key: *key }));
                    expired += 1;
                }
            }
            *queue = kept;
            !queue.is_empty()
        });
        expired
    }

    /// Removes registration `id` without resolving it.
    ///
    /// Used when the caller stops waiting.  Returns `false` if the entry was
    /// already resolved or expired.
    pub fn cancel(&mut self, key: RequestKey, id: RequestId) -> bool {
        let Some(queue) = self.entries.get_mut(&key) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|e| e.id != id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            self.entries.remove(&key);
        }
        if removed {
            debug!(%key, id, "cancelled pending request");
        }
        removed
    }

    /// Fails every waiter with a clone of `error` and empties the table.
    pub fn fail_all(&mut self, error: &ClientError) -> usize {
        let mut failed = 0;
        for (_, queue) in self.entries.drain() {
            for entry in queue {
                let _ = entry.waiter.send(Err(error.clone()));
                failed += 1;
            }
        }
        failed
    }

    /// The earliest deadline among all waiters.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().flatten().map(|e| e.deadline).min()
    }

    /// Number of waiters across all keys.
    pub fn len(&self) -> usize {
        self.entries.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.entries.contains_key(key)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use arcam_core::{CommandCode, Zone};

    fn volume_key() -> RequestKey {
        RequestKey::new(Zone::MAIN, CommandCode::VOLUME)
    }

    fn volume_response(level: u8) -> ResponsePacket {
        ResponsePacket::status_update(Zone::MAIN, CommandCode::VOLUME, vec![level])
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(3)
    }

    #[test]
    fn test_resolve_wakes_the_registered_waiter() {
        // Arrange
        let mut table = PendingTable::new(DuplicatePolicy::Reject);
        let (_, mut rx) = table.register(volume_key(), soon()).unwrap();

        // Act
        let leftover = table.resolve(volume_response(50));

        // Assert
        assert!(leftover.is_none());
        assert_eq!(rx.try_recv().unwrap(), Ok(volume_response(50)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_resolve_without_waiter_returns_packet() {
        let mut table = PendingTable::new(DuplicatePolicy::Reject);
        assert_eq!(table.resolve(volume_response(7)), Some(volume_response(7)));
    }

    #[test]
    fn test_reject_policy_refuses_second_registration() {
        // Arrange
        let mut table = PendingTable::new(DuplicatePolicy::Reject);
        let (_, mut first) = table.register(volume_key(), soon()).unwrap();

        // Act
        let second = table.register(volume_key(), soon());

        // Assert: the first waiter is untouched and still resolvable.
        assert!(matches!(second, Err(ClientError::DuplicateInFlight { key }) if key == volume_key()));
        assert_eq!(table.len(), 1);
        table.resolve(volume_response(1));
        assert_eq!(first.try_recv().unwrap(), Ok(volume_response(1)));
    }

    #[test]
    fn test_queue_policy_resolves_in_registration_order() {
        // Arrange
        let mut table = PendingTable::new(DuplicatePolicy::Queue);
        let (_, mut first) = table.register(volume_key(), soon()).unwrap();
        let (_, mut second) = table.register(volume_key(), soon()).unwrap();

        // Act
        table.resolve(volume_response(1));
        table.resolve(volume_response(2));

        // Assert
        assert_eq!(first.try_recv().unwrap(), Ok(volume_response(1)));
        assert_eq!(second.try_recv().unwrap(), Ok(volume_response(2)));
    }

    #[test]
    fn test_different_keys_do_not_collide() {
        let mut table = PendingTable::new(DuplicatePolicy::Reject);
        let mute = RequestKey::new(Zone::MAIN, CommandCode::MUTE);
        let zone2 = RequestKey::new(Zone::ZONE_2, CommandCode::VOLUME);

        assert!(table.register(volume_key(), soon()).is_ok());
        assert!(table.register(mute, soon()).is_ok());
        assert!(table.register(zone2, soon()).is_ok());
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_expire_due_times_out_only_past_deadlines() {
        // Arrange
        let mut table = PendingTable::new(DuplicatePolicy::Reject);
        let now = Instant::now();
        let mute = RequestKey::new(Zone::MAIN, CommandCode::MUTE);
        let (_, mut late) = table.register(volume_key(), now).unwrap();
        let (_, mut live) = table.register(mute, now + Duration::from_secs(10)).unwrap();

        // Act
        let expired = table.expire_due(now);

        // Assert
        assert_eq!(expired, 1);
        assert_eq!(late.try_recv().unwrap(), Err(ClientError::Timeout { key: volume_key() }));
        assert!(live.try_recv().is_err(), "live waiter must still be pending");
        assert!(!table.contains(&volume_key()));
        assert!(table.contains(&mute));
    }

    #[test]
    fn test_expired_key_can_be_registered_again() {
        let mut table = PendingTable::new(DuplicatePolicy::Reject);
        let now = Instant::now();
        let _ = table.register(volume_key(), now).unwrap();
        table.expire_due(now);

        assert!(table.register(volume_key(), soon()).is_ok());
    }

    #[test]
    fn test_next_deadline_is_the_earliest() {
        let mut table = PendingTable::new(DuplicatePolicy::Queue);
        let now = Instant::now();
        assert_eq!(table.next_deadline(), None);

        let _a = table.register(volume_key(), now + Duration::from_secs(5)).unwrap();
        let _b = table.register(volume_key(), now + Duration::from_secs(2)).unwrap();

        assert_eq!(table.next_deadline(), Some(now + Duration::from_secs(2)));
    }

    #[test]
    fn test_rearm_moves_deadline() {
        let mut table = PendingTable::new(DuplicatePolicy::Reject);
        let now = Instant::now();
        let (id, _rx) = table.register(volume_key(), now).unwrap();

        assert!(table.rearm(volume_key(), id, now + Duration::from_secs(1)));
        assert_eq!(table.expire_due(now), 0);
        assert!(!table.rearm(volume_key(), id + 1, now));
    }

    #[test]
    fn test_cancel_removes_only_that_registration() {
        // Arrange
        let mut table = PendingTable::new(DuplicatePolicy::Queue);
        let (first_id, _first) = table.register(volume_key(), soon()).unwrap();
        let (_, mut second) = table.register(volume_key(), soon()).unwrap();

        // Act
        assert!(table.cancel(volume_key(), first_id));
        table.resolve(volume_response(9));

        // Assert
        assert_eq!(second.try_recv().unwrap(), Ok(volume_response(9)));
        assert!(!table.cancel(volume_key(), first_id));
        assert!(table.is_empty());
    }

    #[test]
    fn test_abandoned_waiter_is_skipped() {
        // Arrange: the first caller dropped its receiver without cancelling.
        let mut table = PendingTable::new(DuplicatePolicy::Queue);
        let (_, first) = table.register(volume_key(), soon()).unwrap();
        let (_, mut second) = table.register(volume_key(), soon()).unwrap();
        drop(first);

        // Act
        let leftover = table.resolve(volume_response(4));

        // Assert
        assert!(leftover.is_none());
        assert_eq!(second.try_recv().unwrap(), Ok(volume_response(4)));
    }

    #[test]
    fn test_response_for_only_abandoned_waiter_is_unsolicited() {
        let mut table = PendingTable::new(DuplicatePolicy::Reject);
        let (_, rx) = table.register(volume_key(), soon()).unwrap();
        drop(rx);

        assert_eq!(table.resolve(volume_response(4)), Some(volume_response(4)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_fail_all_empties_table() {
        // Arrange
        let mut table = PendingTable::new(DuplicatePolicy::Queue);
        let (_, mut a) = table.register(volume_key(), soon()).unwrap();
        let (_, mut b) = table.register(volume_key(), soon()).unwrap();
        let (_, mut c) = table
            .register(RequestKey::new(Zone::MAIN, CommandCode::POWER), soon())
            .unwrap();

        // Act
        let failed = table.fail_all(&ClientError::ConnectionClosed);

        // Assert
        assert_eq!(failed, 3);
        for rx in [&mut a, &mut b, &mut c] {
            assert_eq!(rx.try_recv().unwrap(), Err(ClientError::ConnectionClosed));
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_abandoned_waiter_does_not_block_reject_policy() {
        // Arrange: the first caller dropped its receiver without cancelling.
        let mut table = PendingTable::new(DuplicatePolicy::Reject);
        let (first, rx) = table.register(volume_key(), soon()).unwrap();
        drop(rx);

        // Act
        let second = table.register(volume_key(), soon());

        // Assert
        let (second, _rx) = second.expect("key is free again");
        assert!(!table.is_live(volume_key(), first));
        assert!(table.is_live(volume_key(), second));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_expired_registration_is_not_live() {
        let mut table = PendingTable::new(DuplicatePolicy::Reject);
        let now = Instant::now();
        let (id, _rx) = table.register(volume_key(), now).unwrap();

        table.expire_due(now);

        assert!(!table.is_live(volume_key(), id));
    }

    #[test]
    fn test_duplicate_policy_default_is_reject() {
        assert_eq!(DuplicatePolicy::default(), DuplicatePolicy::Reject);
    }
}
