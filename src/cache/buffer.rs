use std::time::{Duration, Instant};

use crate::core::{Partition, Triple};

/// In-memory multiset of triples waiting for the next flush.
///
/// Not synchronized: the owning cache holds it behind the same mutex that
/// serializes flushes.
#[derive(Debug)]
pub struct MutationBuffer {
    triples: Vec<Triple>,
    last_flush: Instant,
    capacity: usize,
    max_age: Duration,
}

impl MutationBuffer {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            triples: Vec::new(),
            last_flush: Instant::now(),
            capacity,
            max_age,
        }
    }

    /// Duplicates are kept; the backend's set semantics resolve them.
    pub fn push(&mut self, triple: Triple) {
        self.triples.push(triple);
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Distinct partitions in first-seen order.
    pub fn contexts(&self) -> Vec<Partition> {
        let mut seen = Vec::new();
        for triple in &self.triples {
            let partition = triple.partition();
            if !seen.contains(&partition) {
                seen.push(partition);
            }
        }
        seen
    }

    pub fn filter<'a>(&'a self, partition: &'a Partition) -> impl Iterator<Item = &'a Triple> {
        self.triples.iter().filter(move |triple| &triple.partition() == partition)
    }

    pub fn touches(&self, partitions: &[Partition]) -> bool {
        self.triples.iter().any(|triple| partitions.contains(&triple.partition()))
    }

    pub fn clear(&mut self) {
        self.triples.clear();
    }

    /// Clears the buffer and resets the age clock after a successful submission.
    pub fn mark_flushed(&mut self, at: Instant) {
        self.triples.clear();
        self.last_flush = at;
    }

    pub fn set_limits(&mut self, capacity: usize, max_age: Duration) {
        self.capacity = capacity;
        self.max_age = max_age;
    }

    /// Insert-time trigger. Uses `capacity - 1` so it fires on the same
    /// element as the tick check below.
    pub fn should_flush_on_insert(&self) -> bool {
        self.triples.len() > self.capacity.saturating_sub(1)
    }

    pub fn should_flush_on_tick(&self, now: Instant) -> bool {
        !self.is_empty()
            && (self.should_flush_on_insert()
                || now.saturating_duration_since(self.last_flush) > self.max_age)
    }
}
