//! Pending deadlines ordered by due time.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::ScheduleId;
use runtime::Deadline;
use tokio::time::Instant;

/// Far enough ahead to never fire, close enough not to overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Min-heap of due instants with lazy removal.
///
/// Disarming only drops the pending entry; its heap slot is discarded when it
/// reaches the top. Re-arming an id replaces the earlier deadline.
#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, ScheduleId)>>,
    pending: HashMap<ScheduleId, (u64, Deadline)>,
    seq: u64,
}

impl TimerQueue {
    pub fn arm(&mut self, deadline: Deadline) {
        self.seq += 1;
        let due = due_instant(deadline.fire_at, Utc::now(), Instant::now());
        self.heap.push(Reverse((due, self.seq, deadline.schedule_id)));
        self.pending.insert(deadline.schedule_id, (self.seq, deadline));
    }

    pub fn disarm(&mut self, schedule_id: ScheduleId) -> bool {
        self.pending.remove(&schedule_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Instant at which the earliest pending deadline is due.
    pub fn next_due(&mut self) -> Option<Instant> {
        self.discard_stale();
        self.heap.peek().map(|Reverse((due, _, _))| *due)
    }

    /// Removes and returns every deadline due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Deadline> {
        let mut due = Vec::new();
        loop {
            self.discard_stale();
            match self.heap.peek() {
                Some(Reverse((at, _, _))) if *at <= now => {}
                _ => break,
            }
            let Some(Reverse((_, _, schedule_id))) = self.heap.pop() else {
                break;
            };
            if let Some((_, deadline)) = self.pending.remove(&schedule_id) {
                due.push(deadline);
            }
        }
        due
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse((_, seq, schedule_id))) = self.heap.peek() {
            let live = self
                .pending
                .get(schedule_id)
                .is_some_and(|(current, _)| current == seq);
            if live {
                break;
            }
            self.heap.pop();
        }
    }
}

/// Maps a wall-clock due time onto the timer clock. Past-due times map to
/// `now`.
fn due_instant(fire_at: DateTime<Utc>, wall_now: DateTime<Utc>, now: Instant) -> Instant {
    let delay = (fire_at - wall_now).to_std().unwrap_or_default();
    now.checked_add(delay.min(FAR_FUTURE)).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use runtime::Command;

    use super::*;

    fn deadline_in(secs: i64) -> Deadline {
        Deadline {
            schedule_id: ScheduleId::new(),
            command: Command::new("Ping", serde_json::json!(null), serde_json::json!({})),
            fire_at: Utc::now() + chrono::Duration::seconds(secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pops_in_due_order() {
        let mut queue = TimerQueue::default();
        let late = deadline_in(20);
        let early = deadline_in(10);
        queue.arm(late.clone());
        queue.arm(early.clone());

        assert!(queue.pop_due(Instant::now()).is_empty());
        assert_eq!(queue.len(), 2);

        tokio::time::advance(Duration::from_secs(30)).await;
        let due: Vec<_> = queue
            .pop_due(Instant::now())
            .into_iter()
            .map(|d| d.schedule_id)
            .collect();
        assert_eq!(due, vec![early.schedule_id, late.schedule_id]);
        assert_eq!(queue.len(), 0);
        assert!(queue.next_due().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_deadline_never_pops() {
        let mut queue = TimerQueue::default();
        let deadline = deadline_in(5);
        queue.arm(deadline.clone());

        assert!(queue.disarm(deadline.schedule_id));
        assert!(!queue.disarm(deadline.schedule_id));
        assert!(queue.next_due().is_none());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(queue.pop_due(Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_earlier_entry() {
        let mut queue = TimerQueue::default();
        let mut deadline = deadline_in(5);
        queue.arm(deadline.clone());
        deadline.fire_at = Utc::now() + chrono::Duration::seconds(60);
        queue.arm(deadline.clone());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(queue.pop_due(Instant::now()).is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn past_and_distant_times_are_clamped() {
        let wall = Utc::now();
        let now = Instant::now();

        assert_eq!(
            due_instant(wall - chrono::Duration::hours(1), wall, now),
            now
        );
        assert_eq!(
            due_instant(DateTime::<Utc>::MAX_UTC, wall, now),
            now + FAR_FUTURE
        );
    }
}
