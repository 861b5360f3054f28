use std::collections::VecDeque;
use tokio::task::AbortHandle;

use crate::directory::PeerDirectory;
use crate::signaling::PeerId;

/// Deadline attached to one stay in the queue.
///
/// The ticket identifies the stay, so a timer that fires late can tell whether
/// the entry it was armed for is still the one waiting.
#[derive(Debug)]
pub struct WaitTimer {
    ticket: u64,
    handle: Option<AbortHandle>,
}

impl WaitTimer {
    pub fn new(ticket: u64, handle: AbortHandle) -> Self {
        Self {
            ticket,
            handle: Some(handle),
        }
    }

    /// Timer with no task behind it.
    pub fn detached(ticket: u64) -> Self {
        Self {
            ticket,
            handle: None,
        }
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn cancel(self) {
        if let Some(handle) = self.handle {
            handle.abort();
        }
    }
}

#[derive(Debug)]
struct Waiter {
    id: PeerId,
    /// Partner this stay must not be matched with, set when a pair splits
    /// via `next`.
    avoid: Option<PeerId>,
    timer: WaitTimer,
}

impl Waiter {
    fn accepts(&self, other: &Waiter) -> bool {
        self.avoid != Some(other.id)
    }
}

/// A freshly formed pair. `first` waited longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub first: PeerId,
    pub second: PeerId,
}

/// FIFO list of identities waiting for a partner.
#[derive(Debug, Default)]
pub struct PairingQueue {
    waiting: VecDeque<Waiter>,
    next_ticket: u64,
}

impl PairingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    /// Append `id`, never to be matched with `avoid` during this stay.
    /// Refuses and cancels `timer` if `id` is already waiting.
    pub fn enqueue(&mut self, id: PeerId, avoid: Option<PeerId>, timer: WaitTimer) -> bool {
        if self.contains(id) {
            timer.cancel();
            return false;
        }
        self.waiting.push_back(Waiter { id, avoid, timer });
        true
    }

    /// Remove `id` wherever it sits and cancel its timer.
    pub fn dequeue_if_present(&mut self, id: PeerId) -> bool {
        match self.position(id) {
            Some(index) => {
                if let Some(waiter) = self.waiting.remove(index) {
                    waiter.timer.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Remove `id` only if its current stay matches `ticket`. Used by the
    /// timer itself, so the handle is dropped rather than aborted.
    pub fn expire(&mut self, id: PeerId, ticket: u64) -> bool {
        let index = self
            .waiting
            .iter()
            .position(|w| w.id == id && w.timer.ticket() == ticket);
        match index {
            Some(index) => self.waiting.remove(index).is_some(),
            None => false,
        }
    }

    /// Pair off waiters oldest first until no compatible pair remains,
    /// linking each pair in `directory`. A waiter is skipped over only for
    /// the partner it is avoiding.
    pub fn try_match(&mut self, directory: &mut PeerDirectory) -> Vec<Pair> {
        let mut pairs = Vec::new();
        while let Some((i, j)) = self.next_match() {
            // j > i, so removing j first keeps i in place.
            let (Some(second), Some(first)) = (self.waiting.remove(j), self.waiting.remove(i))
            else {
                break;
            };
            if directory.link(first.id, second.id) {
                first.timer.cancel();
                second.timer.cancel();
                pairs.push(Pair {
                    first: first.id,
                    second: second.id,
                });
                continue;
            }

            // Only reachable if a paired identity slipped into the queue.
            // Whoever is still unpaired keeps its place and its timer.
            for waiter in [second, first] {
                if directory.is_paired(waiter.id) {
                    tracing::error!(
                        peer_id = %waiter.id,
                        "queued identity already paired; dropping from queue"
                    );
                    waiter.timer.cancel();
                } else {
                    self.waiting.insert(i, waiter);
                }
            }
        }
        pairs
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<PeerId> {
        self.waiting.iter().map(|w| w.id).collect()
    }

    fn next_match(&self) -> Option<(usize, usize)> {
        self.waiting.iter().enumerate().find_map(|(i, a)| {
            self.waiting
                .iter()
                .enumerate()
                .skip(i + 1)
                .find(|(_, b)| a.accepts(b) && b.accepts(a))
                .map(|(j, _)| (i, j))
        })
    }

    fn position(&self, id: PeerId) -> Option<usize> {
        self.waiting.iter().position(|w| w.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> PeerId {
        PeerId::new(n)
    }

    fn push(queue: &mut PairingQueue, n: u64) -> u64 {
        let ticket = queue.next_ticket();
        assert!(queue.enqueue(id(n), None, WaitTimer::detached(ticket)));
        ticket
    }

    #[test_timeout::timeout]
    fn matches_in_arrival_order() {
        let mut queue = PairingQueue::new();
        let mut dir = PeerDirectory::new();
        for n in 1..=5 {
            push(&mut queue, n);
        }

        let pairs = queue.try_match(&mut dir);
        assert_eq!(
            pairs,
            vec![
                Pair { first: id(1), second: id(2) },
                Pair { first: id(3), second: id(4) },
            ]
        );
        assert_eq!(queue.ids(), vec![id(5)]);
        assert_eq!(dir.peer_of(id(4)), Some(id(3)));
    }

    #[test_timeout::timeout]
    fn single_waiter_is_not_matched() {
        let mut queue = PairingQueue::new();
        let mut dir = PeerDirectory::new();
        push(&mut queue, 1);
        assert!(queue.try_match(&mut dir).is_empty());
        assert!(queue.contains(id(1)));
    }

    #[test_timeout::timeout]
    fn enqueue_refuses_duplicates() {
        let mut queue = PairingQueue::new();
        push(&mut queue, 1);
        let ticket = queue.next_ticket();
        assert!(!queue.enqueue(id(1), None, WaitTimer::detached(ticket)));
        assert_eq!(queue.len(), 1);
    }

    #[test_timeout::timeout]
    fn dequeue_from_the_middle_keeps_order() {
        let mut queue = PairingQueue::new();
        let mut dir = PeerDirectory::new();
        for n in 1..=3 {
            push(&mut queue, n);
        }
        assert!(queue.dequeue_if_present(id(2)));
        assert!(!queue.dequeue_if_present(id(2)));
        assert_eq!(
            queue.try_match(&mut dir),
            vec![Pair { first: id(1), second: id(3) }]
        );
    }

    fn push_avoiding(queue: &mut PairingQueue, n: u64, avoid: u64) {
        let ticket = queue.next_ticket();
        assert!(queue.enqueue(id(n), Some(id(avoid)), WaitTimer::detached(ticket)));
    }

    #[test_timeout::timeout]
    fn split_pair_is_not_rebuilt() {
        let mut queue = PairingQueue::new();
        let mut dir = PeerDirectory::new();
        push_avoiding(&mut queue, 2, 1);
        push_avoiding(&mut queue, 1, 2);

        assert!(queue.try_match(&mut dir).is_empty());
        assert_eq!(queue.ids(), vec![id(2), id(1)]);

        push(&mut queue, 3);
        assert_eq!(
            queue.try_match(&mut dir),
            vec![Pair { first: id(2), second: id(3) }]
        );
        push(&mut queue, 4);
        assert_eq!(
            queue.try_match(&mut dir),
            vec![Pair { first: id(1), second: id(4) }]
        );
        assert!(queue.is_empty());
    }

    #[test_timeout::timeout]
    fn avoided_partner_is_skipped_without_losing_fifo() {
        let mut queue = PairingQueue::new();
        let mut dir = PeerDirectory::new();
        push_avoiding(&mut queue, 1, 2);
        push(&mut queue, 2);
        push(&mut queue, 3);
        push(&mut queue, 4);

        assert_eq!(
            queue.try_match(&mut dir),
            vec![
                Pair { first: id(1), second: id(3) },
                Pair { first: id(2), second: id(4) },
            ]
        );
    }

    #[test_timeout::timeout]
    fn failed_link_keeps_the_unpaired_side_queued() {
        let mut queue = PairingQueue::new();
        let mut dir = PeerDirectory::new();
        dir.link(id(1), id(9));
        push(&mut queue, 1);
        push(&mut queue, 2);

        assert!(queue.try_match(&mut dir).is_empty());
        assert_eq!(queue.ids(), vec![id(2)]);
        assert_eq!(dir.peer_of(id(1)), Some(id(9)));

        push(&mut queue, 3);
        assert_eq!(
            queue.try_match(&mut dir),
            vec![Pair { first: id(2), second: id(3) }]
        );
    }

    #[test_timeout::timeout]
    fn stale_ticket_does_not_expire_a_later_stay() {
        let mut queue = PairingQueue::new();
        let old = push(&mut queue, 1);
        queue.dequeue_if_present(id(1));
        let fresh = push(&mut queue, 1);

        assert!(!queue.expire(id(1), old));
        assert!(queue.contains(id(1)));
        assert!(queue.expire(id(1), fresh));
        assert!(queue.is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn dequeue_aborts_the_timer_task() {
        let mut queue = PairingQueue::new();
        let task = tokio::spawn(std::future::pending::<()>());
        let ticket = queue.next_ticket();
        queue.enqueue(id(1), None, WaitTimer::new(ticket, task.abort_handle()));

        queue.dequeue_if_present(id(1));
        let err = task.await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
