//! Property tests for the priority work queue.
//!
//! Pop order must equal a stable sort by descending priority, and removal
//! must never disturb the relative order of what remains.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::collections::HashSet;

use orchestrator::work::CloseMode;
use orchestrator::{PriorityQueue, WorkId};
use proptest::prelude::*;

fn fill(queue: &PriorityQueue, priorities: &[i32]) -> Result<Vec<WorkId>, TestCaseError> {
    let mut ids = Vec::with_capacity(priorities.len());
    for (n, priority) in priorities.iter().enumerate() {
        let id = WorkId::from_string(format!("work-{n}"));
        queue
            .push(id.clone(), *priority)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        ids.push(id);
    }
    Ok(ids)
}

fn drain(queue: &PriorityQueue) -> Vec<WorkId> {
    std::iter::from_fn(|| queue.try_pop()).map(|entry| entry.id).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_pop_order_is_stable_descending_priority(
        priorities in proptest::collection::vec(0i32..6, 0..60),
    ) {
        let queue = PriorityQueue::new();
        let ids = fill(&queue, &priorities)?;

        let mut expected: Vec<(i32, usize)> =
            priorities.iter().copied().enumerate().map(|(n, p)| (p, n)).collect();
        expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let expected: Vec<WorkId> = expected.into_iter().map(|(_, n)| ids[n].clone()).collect();

        prop_assert_eq!(drain(&queue), expected);
        prop_assert!(queue.is_empty());
    }

    #[test]
    fn prop_removal_preserves_order_of_remaining(
        priorities in proptest::collection::vec(0i32..4, 1..40),
        removals in proptest::collection::vec(any::<prop::sample::Index>(), 0..10),
    ) {
        let queue = PriorityQueue::new();
        let ids = fill(&queue, &priorities)?;

        let removed: HashSet<usize> = removals.iter().map(|index| index.index(ids.len())).collect();
        for n in &removed {
            prop_assert!(queue.remove(&ids[*n]).is_some());
        }
        prop_assert_eq!(queue.len(), ids.len() - removed.len());

        let mut expected: Vec<(i32, usize)> = priorities
            .iter()
            .copied()
            .enumerate()
            .filter(|(n, _)| !removed.contains(n))
            .map(|(n, p)| (p, n))
            .collect();
        expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let expected: Vec<WorkId> = expected.into_iter().map(|(_, n)| ids[n].clone()).collect();

        prop_assert_eq!(drain(&queue), expected);
    }

    #[test]
    fn prop_snapshot_matches_pop_order(
        priorities in proptest::collection::vec(-3i32..3, 0..30),
    ) {
        let queue = PriorityQueue::new();
        fill(&queue, &priorities)?;

        let snapshot: Vec<WorkId> = queue.snapshot().into_iter().map(|entry| entry.id).collect();
        prop_assert_eq!(snapshot, drain(&queue));
    }
}

#[tokio::test]
async fn given_drain_close_when_items_remain_then_pop_returns_them_before_none() {
    let queue = PriorityQueue::new();
    let _ = queue.push(WorkId::from_string("work-low"), 1);
    let _ = queue.push(WorkId::from_string("work-high"), 9);

    queue.close(CloseMode::Drain);

    let first = queue.pop().await.map(|entry| entry.id);
    let second = queue.pop().await.map(|entry| entry.id);
    assert_eq!(first, Some(WorkId::from_string("work-high")));
    assert_eq!(second, Some(WorkId::from_string("work-low")));
    assert!(queue.pop().await.is_none());
    assert!(queue.push(WorkId::from_string("work-late"), 5).is_err());
}

#[tokio::test]
async fn given_discard_close_when_items_remain_then_pop_returns_none_and_items_stay() {
    let queue = PriorityQueue::new();
    let _ = queue.push(WorkId::from_string("work-a"), 1);

    queue.close(CloseMode::Discard);
    queue.close(CloseMode::Drain);

    assert!(queue.pop().await.is_none());
    assert_eq!(queue.len(), 1);
}
