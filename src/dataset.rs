use std::cmp::Ordering;

/// An event after indexing: outcome and predicates replaced by dense IDs.
///
/// Predicate IDs are sorted ascending with their values carried along.
/// Two indexed events are equal when their outcomes match and their
/// `(predicate, value)` pairs match element-wise, a missing value array
/// reading as 1.0 everywhere. `multiplicity` is not part of the identity.
#[derive(Debug, Clone)]
pub struct IndexedEvent {
    /// Outcome ID
    pub outcome: u32,
    /// Sorted predicate IDs
    pub predicates: Vec<u32>,
    /// Values parallel to `predicates`, `None` for binary events
    pub values: Option<Vec<f64>>,
    /// Number of times this event was seen
    pub multiplicity: u32,
}

impl IndexedEvent {
    /// Create an indexed event, sorting the predicates (and values) by ID
    pub fn new(outcome: u32, predicates: Vec<u32>, values: Option<Vec<f64>>) -> Self {
        let (predicates, values) = match values {
            None => {
                let mut predicates = predicates;
                predicates.sort_unstable();
                (predicates, None)
            }
            Some(values) => {
                let mut pairs: Vec<(u32, f64)> = predicates.into_iter().zip(values).collect();
                pairs.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
                let (p, v) = pairs.into_iter().unzip();
                (p, Some(v))
            }
        };
        Self {
            outcome,
            predicates,
            values,
            multiplicity: 1,
        }
    }

    /// Number of active predicates
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Returns `true` if no predicate is active
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Value of the predicate at `index`, 1.0 for binary events
    #[inline]
    pub fn value(&self, index: usize) -> f64 {
        match &self.values {
            Some(values) => values[index],
            None => 1.0,
        }
    }

    /// Sum of the active predicate values
    pub fn total_value(&self) -> f64 {
        match &self.values {
            Some(values) => values.iter().sum(),
            None => self.predicates.len() as f64,
        }
    }
}

impl Ord for IndexedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Predicate IDs decide before any value does
        self.outcome
            .cmp(&other.outcome)
            .then_with(|| self.predicates.cmp(&other.predicates))
            .then_with(|| {
                (0..self.len())
                    .map(|i| self.value(i).total_cmp(&other.value(i)))
                    .find(|ord| ord.is_ne())
                    .unwrap_or(Ordering::Equal)
            })
    }
}

impl PartialOrd for IndexedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexedEvent {}

/// Sort events and merge equal neighbours, summing their multiplicities.
pub(crate) fn sort_and_merge(events: &mut Vec<IndexedEvent>) {
    events.sort();
    events.dedup_by(|dup, kept| {
        if dup == kept {
            kept.multiplicity += dup.multiplicity;
            true
        } else {
            false
        }
    });
}
