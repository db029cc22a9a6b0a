use crate::types::{Candidate, OccurrenceEntry, PipelineResult};
use std::collections::HashMap;

/// Tallies plate readings across the frames of one video.
///
/// Entries stay in the order their text was first seen, which is what makes
/// the tie-break in [`OccurrenceTracker::into_winner`] deterministic.
#[derive(Debug, Default)]
pub struct OccurrenceTracker {
    entries: Vec<OccurrenceEntry>,
    index: HashMap<String, usize>,
}

impl OccurrenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Texts are matched exactly. Only the first candidate's snapshot is kept.
    pub fn record(&mut self, candidate: Candidate) {
        match self.index.get(&candidate.text) {
            Some(&i) => self.entries[i].count += 1,
            None => {
                self.index.insert(candidate.text.clone(), self.entries.len());
                self.entries.push(OccurrenceEntry {
                    text: candidate.text,
                    count: 1,
                    snapshot: candidate.snapshot,
                });
            }
        }
    }

    #[cfg(test)]
    pub fn count(&self, text: &str) -> u32 {
        self.index.get(text).map_or(0, |&i| self.entries[i].count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Total readings recorded, across all texts.
    pub fn readings(&self) -> u32 {
        self.entries.iter().map(|e| e.count).sum()
    }

    /// The most frequent text. On equal counts the text seen first wins.
    pub fn into_winner(self) -> PipelineResult {
        let mut best: Option<OccurrenceEntry> = None;
        for entry in self.entries {
            if best.as_ref().map_or(true, |b| entry.count > b.count) {
                best = Some(entry);
            }
        }
        match best {
            Some(entry) => PipelineResult::Detected(entry),
            None => PipelineResult::NoDetection,
        }
    }
}
