//! Bounded, ordered chat history.

use std::collections::VecDeque;

use crate::domain::chat::TranscriptEntry;
use crate::domain::identity::MessageId;

/// Keeps at most `limit` entries; the oldest fall off first.
///
/// Every mutation returns whatever it evicted so the caller can release
/// resources tied to those entries.
#[derive(Debug, Clone)]
pub struct Transcript {
    entries: VecDeque<TranscriptEntry>,
    limit: usize,
}

impl Transcript {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Entries that have a receipt time, in transcript order.
    pub fn received(&self) -> Vec<TranscriptEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_received())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn push(&mut self, entry: TranscriptEntry) -> Vec<TranscriptEntry> {
        self.entries.push_back(entry);
        self.bound()
    }

    /// Replace the whole history.
    #[must_use]
    pub fn replace(&mut self, entries: Vec<TranscriptEntry>) -> Vec<TranscriptEntry> {
        let mut evicted: Vec<_> = self.entries.drain(..).collect();
        self.entries.extend(entries);
        evicted.extend(self.bound());
        evicted
    }

    /// Stamp the entry with `id` as received. Returns `false` if it is no
    /// longer in the window.
    pub fn mark_received(&mut self, id: &MessageId, at: u64) -> bool {
        match self.entries.iter_mut().rev().find(|e| e.id() == id) {
            Some(entry) => {
                entry.mark_received(at);
                true
            }
            None => false,
        }
    }

    fn bound(&mut self) -> Vec<TranscriptEntry> {
        let excess = self.entries.len().saturating_sub(self.limit);
        self.entries.drain(..excess).collect()
    }
}
