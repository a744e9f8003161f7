use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use super::{Queue, QueueError};

#[derive(Default)]
struct List {
    items: VecDeque<String>,
    notify: Arc<Notify>,
}

/// In-process queue, also the storage behind the TCP broker
#[derive(Default)]
pub struct MemoryQueue {
    lists: Mutex<HashMap<String, List>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads waiting in `queue`
    pub fn len(&self, queue: &str) -> usize {
        self.with_list(queue, |list| list.items.len())
    }

    /// Put a payload back at the head of `queue`
    pub fn restore(&self, queue: &str, payload: String) {
        let notify = self.with_list(queue, |list| {
            list.items.push_front(payload);
            list.notify.clone()
        });
        notify.notify_one();
    }

    fn with_list<T>(&self, queue: &str, f: impl FnOnce(&mut List) -> T) -> T {
        let mut lists = self.lists.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(lists.entry(queue.to_string()).or_default())
    }

    fn try_pop(&self, queue: &str) -> (Option<String>, Arc<Notify>) {
        self.with_list(queue, |list| (list.items.pop_front(), list.notify.clone()))
    }
}

#[async_trait::async_trait]
impl Queue for MemoryQueue {
    async fn push(&self, queue: &str, payload: String) -> Result<(), QueueError> {
        let notify = self.with_list(queue, |list| {
            list.items.push_back(payload);
            list.notify.clone()
        });
        // Stores a permit when nobody waits yet, so a popper about to sleep still wakes up.
        notify.notify_one();
        Ok(())
    }

    async fn blocking_pop(&self, queue: &str) -> Result<String, QueueError> {
        loop {
            let (item, notify) = self.try_pop(queue);
            if let Some(item) = item {
                // Only one permit is stored, pass the wakeup on while items remain.
                if self.len(queue) > 0 {
                    notify.notify_one();
                }
                return Ok(item);
            }
            notify.notified().await;
        }
    }

    async fn pop(&self, queue: &str) -> Result<Option<String>, QueueError> {
        Ok(self.try_pop(queue).0)
    }
}
