use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-conversation locks so two turns never interleave on one state.
///
/// Turns for different conversations proceed in parallel; turns for the
/// same conversation queue up in arrival order (tokio's mutex is fair).
#[derive(Default)]
pub struct ConversationLanes {
    lanes: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ConversationLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `conversation_id`. Held until the guard drops.
    pub async fn acquire(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let lane = {
            let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
            // Drop lanes nobody holds or waits on.
            lanes.retain(|_, lane| Arc::strong_count(lane) > 1);
            lanes
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lane.lock_owned().await
    }

    /// Number of lanes currently tracked.
    pub fn len(&self) -> usize {
        self.lanes.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_conversation_is_serialized() {
        let lanes = Arc::new(ConversationLanes::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let guard = lanes.acquire("c1").await;
        let waiter = {
            let lanes = lanes.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let _g = lanes.acquire("c1").await;
                log.lock().unwrap().push("second");
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        log.lock().unwrap().push("first");
        drop(guard);
        waiter.await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_different_conversations_do_not_block() {
        let lanes = ConversationLanes::new();
        let _a = lanes.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), lanes.acquire("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_idle_lanes_are_pruned() {
        let lanes = ConversationLanes::new();
        drop(lanes.acquire("a").await);
        drop(lanes.acquire("b").await);
        // Acquiring prunes idle lanes before adding its own.
        let _c = lanes.acquire("c").await;
        assert_eq!(lanes.len(), 1);
    }
}
