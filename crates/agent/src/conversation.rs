use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use foodlink_core::domain::conversation::{Message, ThreadId};

type Thread = Arc<Mutex<Vec<Message>>>;

/// Per-thread message history.
///
/// The map lock is only held long enough to find or create a thread; appends
/// then serialize on that thread's own lock, so unrelated conversations never
/// wait on each other.
#[derive(Default)]
pub struct ConversationStore {
    threads: RwLock<HashMap<ThreadId, Thread>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn existing(&self, thread_id: &ThreadId) -> Option<Thread> {
        self.threads.read().await.get(thread_id).cloned()
    }

    async fn thread(&self, thread_id: &ThreadId) -> Thread {
        if let Some(thread) = self.existing(thread_id).await {
            return thread;
        }
        let mut threads = self.threads.write().await;
        threads.entry(thread_id.clone()).or_default().clone()
    }

    /// Appends one message and returns the thread length after the append.
    pub async fn append(&self, thread_id: &ThreadId, message: Message) -> usize {
        let thread = self.thread(thread_id).await;
        let mut messages = thread.lock().await;
        messages.push(message);
        messages.len()
    }

    pub async fn read(&self, thread_id: &ThreadId) -> Vec<Message> {
        match self.existing(thread_id).await {
            Some(thread) => thread.lock().await.clone(),
            None => Vec::new(),
        }
    }

    /// The last `n` messages of a thread, oldest first.
    pub async fn window(&self, thread_id: &ThreadId, n: usize) -> Vec<Message> {
        match self.existing(thread_id).await {
            Some(thread) => {
                let messages = thread.lock().await;
                let start = messages.len().saturating_sub(n);
                messages[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}
