//! In-memory conversation store.
//!
//! Bounded working copy of each workflow's message log, keyed by workflow
//! id. The authoritative durable tier is the resume state store; the
//! orchestrator flushes to it after every tool call, so this map only ever
//! holds the live run's transcript.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use workflow_runner_sdk::ChatMessage;

#[derive(Clone, Default)]
pub struct ConversationStore {
    inner: Arc<Mutex<HashMap<String, Vec<ChatMessage>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message to the workflow's log, creating it if absent.
    pub fn append(&self, workflow_id: &str, message: ChatMessage) {
        let mut logs = self.inner.lock().unwrap();
        logs.entry(workflow_id.to_string())
            .or_default()
            .push(message);
    }

    /// Replace the workflow's log wholesale (used on rehydration).
    pub fn replace(&self, workflow_id: &str, messages: Vec<ChatMessage>) {
        let mut logs = self.inner.lock().unwrap();
        logs.insert(workflow_id.to_string(), messages);
    }

    /// Snapshot of the current log for the workflow, empty if unknown.
    pub fn history(&self, workflow_id: &str) -> Vec<ChatMessage> {
        let logs = self.inner.lock().unwrap();
        logs.get(workflow_id).cloned().unwrap_or_default()
    }

    pub fn len(&self, workflow_id: &str) -> usize {
        let logs = self.inner.lock().unwrap();
        logs.get(workflow_id).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, workflow_id: &str) -> bool {
        self.len(workflow_id) == 0
    }

    /// Drop the workflow's log (end of run).
    pub fn remove(&self, workflow_id: &str) {
        let mut logs = self.inner.lock().unwrap();
        logs.remove(workflow_id);
    }
}
