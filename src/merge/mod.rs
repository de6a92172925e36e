//! Per-user merge queues.
//!
//! Users submit audio references one by one; an explicit merge trigger drains
//! the queue. Draining is unconditional once the minimum count is met, so a
//! failed merge attempt never leaves a stuck queue behind.

use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::delivery::UserId;
use crate::{PipelineError, Result};

/// Ordered per-user queues of submitted audio references.
#[derive(Debug, Default)]
pub struct MergeQueues {
    queues: Mutex<HashMap<UserId, Vec<String>>>,
}

impl MergeQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reference to the user's queue; returns the new count.
    pub async fn enqueue(&self, user: UserId, file_ref: impl Into<String>) -> usize {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(user).or_default();
        queue.push(file_ref.into());
        queue.len()
    }

    /// Number of references currently queued for the user.
    pub async fn len(&self, user: UserId) -> usize {
        self.queues
            .lock()
            .await
            .get(&user)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Drain the queue for a merge attempt.
    ///
    /// Fails with `InsufficientInputs` below two items, leaving the queue
    /// unchanged. On success the queue is already cleared when this returns,
    /// so the clearing holds whether the merge that follows succeeds or not.
    pub async fn take_for_merge(&self, user: UserId) -> Result<Vec<String>> {
        let mut queues = self.queues.lock().await;
        let queue = queues.get_mut(&user);

        match queue {
            Some(q) if q.len() >= 2 => Ok(std::mem::take(q)),
            _ => Err(PipelineError::InsufficientInputs.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: UserId = UserId(3);

    fn is_insufficient(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InsufficientInputs)
        )
    }

    #[tokio::test]
    async fn test_enqueue_reports_count() {
        let queues = MergeQueues::new();
        assert_eq!(queues.enqueue(USER, "a").await, 1);
        assert_eq!(queues.enqueue(USER, "b").await, 2);
        assert_eq!(queues.len(USER).await, 2);
    }

    #[tokio::test]
    async fn test_single_item_merge_fails_and_queue_is_unchanged() {
        let queues = MergeQueues::new();
        queues.enqueue(USER, "a").await;

        let err = queues.take_for_merge(USER).await.unwrap_err();
        assert!(is_insufficient(&err));
        assert_eq!(queues.len(USER).await, 1);
    }

    #[tokio::test]
    async fn test_empty_queue_merge_fails() {
        let queues = MergeQueues::new();
        let err = queues.take_for_merge(USER).await.unwrap_err();
        assert!(is_insufficient(&err));
    }

    #[tokio::test]
    async fn test_take_clears_queue_regardless_of_later_outcome() {
        let queues = MergeQueues::new();
        queues.enqueue(USER, "a").await;
        queues.enqueue(USER, "b").await;

        let taken = queues.take_for_merge(USER).await.unwrap();
        assert_eq!(taken, vec!["a".to_string(), "b".to_string()]);

        // Whether the merge that follows fails or succeeds, nothing is left.
        assert_eq!(queues.len(USER).await, 0);
        assert!(is_insufficient(&queues.take_for_merge(USER).await.unwrap_err()));
    }

    #[tokio::test]
    async fn test_queues_are_independent_per_user() {
        let queues = MergeQueues::new();
        queues.enqueue(UserId(1), "a").await;
        queues.enqueue(UserId(1), "b").await;
        queues.enqueue(UserId(2), "c").await;

        queues.take_for_merge(UserId(1)).await.unwrap();
        assert_eq!(queues.len(UserId(2)).await, 1);
    }

    #[tokio::test]
    async fn test_order_is_preserved() {
        let queues = MergeQueues::new();
        for name in ["first", "second", "third"] {
            queues.enqueue(USER, name).await;
        }
        let taken = queues.take_for_merge(USER).await.unwrap();
        assert_eq!(taken, vec!["first", "second", "third"]);
    }
}
