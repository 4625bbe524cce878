//! Debounced staging buffer
//!
//! Pending per-chunk payloads sit here until the quiescent interval after
//! the last stage elapses. Restaging a chunk overwrites its pending
//! payload and pushes the deadline out, so rapid successive updates
//! collapse into one write. The buffer is a pure state container; the
//! engine serializes access and performs the flush I/O.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::shard::ChunkPayload;

#[derive(Debug, Default)]
pub struct StagingBuffer {
    entries: HashMap<String, ChunkPayload>,
    deadline: Option<Instant>,
    flushing: bool,
}

impl StagingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a payload for `name`, replacing any pending payload and
    /// re-arming the debounce deadline
    pub fn stage(&mut self, name: &str, payload: ChunkPayload, debounce: Duration) {
        self.entries.insert(name.to_string(), payload);
        self.deadline = Some(Instant::now() + debounce);
    }

    pub fn is_dirty(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn clear_deadline(&mut self) {
        self.deadline = None;
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub fn set_flushing(&mut self, flushing: bool) {
        self.flushing = flushing;
    }

    /// Names with pending payloads, in arbitrary order
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&ChunkPayload> {
        self.entries.get(name)
    }

    /// Drop a pending entry once its persist succeeded
    pub fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: serde_json::Value) -> ChunkPayload {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_restage_overwrites_pending_payload() {
        let mut buffer = StagingBuffer::new();
        let window = Duration::from_millis(500);

        buffer.stage("k", obj(json!({"v": 1})), window);
        buffer.stage("k", obj(json!({"v": 2})), window);

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get("k"), Some(&obj(json!({"v": 2}))));
    }

    #[test]
    fn test_distinct_chunks_are_all_kept() {
        let mut buffer = StagingBuffer::new();
        let window = Duration::from_millis(500);

        buffer.stage("a", obj(json!({"n": 1})), window);
        buffer.stage("b", obj(json!({"n": 2})), window);

        assert_eq!(buffer.len(), 2);
        let mut names = buffer.names();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_stage_arms_deadline() {
        let mut buffer = StagingBuffer::new();
        assert!(buffer.deadline().is_none());

        buffer.stage("k", obj(json!({})), Duration::from_secs(1));
        let deadline = buffer.deadline().expect("armed");
        assert!(deadline > Instant::now());

        buffer.clear_deadline();
        assert!(buffer.deadline().is_none());
        assert!(buffer.is_dirty());
    }

    #[test]
    fn test_remove_clears_entry() {
        let mut buffer = StagingBuffer::new();
        buffer.stage("k", obj(json!({"v": 1})), Duration::ZERO);
        buffer.remove("k");
        assert!(buffer.is_empty());
    }
}
