use std::collections::HashMap;

use tracing::{debug, warn};

use crate::dataset::{sort_and_merge, IndexedEvent};
use crate::dictionary::Dictionary;
use crate::error::Result;
use crate::event::Event;

/// Training data compacted into integer IDs
#[derive(Debug, Clone)]
pub struct DataIndex {
    /// Retained predicates
    predicates: Dictionary,
    /// Outcomes in first-seen order
    outcomes: Dictionary,
    /// Indexed (and, when sorting, merged) events
    events: Vec<IndexedEvent>,
    /// Occurrence count of every retained predicate
    predicate_counts: Vec<u64>,
    /// Largest total predicate value of any event, rounded up
    correction_constant: f64,
    /// Events dropped because no predicate survived the cutoff
    num_dropped: usize,
}

impl DataIndex {
    /// Predicate table
    pub fn predicates(&self) -> &Dictionary {
        &self.predicates
    }

    /// Outcome table
    pub fn outcomes(&self) -> &Dictionary {
        &self.outcomes
    }

    /// Indexed events
    pub fn events(&self) -> &[IndexedEvent] {
        &self.events
    }

    /// Occurrence count of each retained predicate, indexed by predicate ID
    pub fn predicate_counts(&self) -> &[u64] {
        &self.predicate_counts
    }

    /// GIS correction constant, at least 1
    pub fn correction_constant(&self) -> f64 {
        self.correction_constant
    }

    /// Number of events dropped for lack of retained predicates
    pub fn num_dropped(&self) -> usize {
        self.num_dropped
    }

    /// Number of distinct indexed events
    pub fn num_unique_events(&self) -> usize {
        self.events.len()
    }

    /// Number of indexed events counting multiplicity
    pub fn num_events(&self) -> u64 {
        self.events.iter().map(|e| u64::from(e.multiplicity)).sum()
    }
}

/// Compacts raw events into a [`DataIndex`].
///
/// Predicates seen fewer than `cutoff` times are dropped from every event;
/// an event left without predicates is dropped and reported. When sorting is
/// enabled (the default) equal indexed events are merged into one event
/// with a higher multiplicity.
#[derive(Debug, Clone, Copy)]
pub struct EventIndexer {
    cutoff: u32,
    sort: bool,
}

impl Default for EventIndexer {
    fn default() -> Self {
        Self::new(0)
    }
}

impl EventIndexer {
    pub fn new(cutoff: u32) -> Self {
        Self { cutoff, sort: true }
    }

    /// Enable or disable sorting and merging of equal events
    pub fn sort(mut self, sort: bool) -> Self {
        self.sort = sort;
        self
    }

    pub fn cutoff(&self) -> u32 {
        self.cutoff
    }

    /// Index `events`
    ///
    /// Every event is validated before any indexing work is done.
    pub fn index(&self, events: &[Event]) -> Result<DataIndex> {
        for event in events {
            event.validate()?;
        }

        // A predicate is admitted once, when its running count reaches the
        // threshold, and keeps the ID it got at that point.
        let threshold = u64::from(self.cutoff.max(1));
        let mut counts: HashMap<&str, u64> = HashMap::new();
        let mut predicates = Dictionary::new();
        for event in events {
            for name in event.predicates() {
                let count = counts.entry(name.as_str()).or_insert(0);
                *count += 1;
                if *count == threshold {
                    predicates.get_or_insert(name);
                }
            }
        }
        let predicate_counts: Vec<u64> = predicates
            .iter()
            .map(|(name, _)| counts.get(name).copied().unwrap_or(0))
            .collect();

        let mut outcomes = Dictionary::new();
        let mut indexed = Vec::with_capacity(events.len());
        let mut num_dropped = 0;
        for event in events {
            // Outcomes get their ID even when the event is dropped below
            let oid = outcomes.get_or_insert(event.outcome());
            let mut pids = Vec::with_capacity(event.predicates().len());
            let mut values = event.values().map(|_| Vec::with_capacity(pids.capacity()));
            for (i, name) in event.predicates().iter().enumerate() {
                if let Some(pid) = predicates.get(name) {
                    pids.push(pid);
                    if let Some(values) = values.as_mut() {
                        values.push(event.value(i));
                    }
                }
            }
            if pids.is_empty() {
                warn!(
                    outcome = event.outcome(),
                    predicates = ?event.predicates(),
                    "dropped event with no predicates above the cutoff"
                );
                num_dropped += 1;
                continue;
            }
            indexed.push(IndexedEvent::new(oid, pids, values));
        }

        if self.sort {
            sort_and_merge(&mut indexed);
        }

        let correction_constant = indexed
            .iter()
            .map(IndexedEvent::total_value)
            .fold(0.0, f64::max)
            .ceil()
            .max(1.0);

        debug!(
            events = events.len(),
            unique_events = indexed.len(),
            dropped = num_dropped,
            predicates = predicates.len(),
            outcomes = outcomes.len(),
            correction_constant,
            "indexed events"
        );

        Ok(DataIndex {
            predicates,
            outcomes,
            events: indexed,
            predicate_counts,
            correction_constant,
            num_dropped,
        })
    }
}
