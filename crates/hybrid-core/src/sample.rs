//! Candidate solutions
//!
//! A [`SampleSet`] is an ordered, copy-on-write collection of [`Sample`]s.
//! Cloning a set is cheap; the first mutation on a shared set copies it, so
//! branches holding clones never observe each other's writes.

use crate::info::Info;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// A single candidate solution with its quality value
///
/// Lower `energy` is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Variable assignment
    pub values: Vec<i64>,
    /// Quality value (lower is better)
    pub energy: f64,
    /// How many times this assignment was observed
    pub num_occurrences: u64,
    /// Per-candidate metadata
    #[serde(default, skip_serializing_if = "Info::is_empty")]
    pub metadata: Info,
}

impl Sample {
    /// Create a sample observed once
    #[inline]
    #[must_use]
    pub fn new(values: Vec<i64>, energy: f64) -> Self {
        Self {
            values,
            energy,
            num_occurrences: 1,
            metadata: Info::new(),
        }
    }

    /// Set occurrence count
    #[inline]
    #[must_use]
    pub fn with_occurrences(mut self, count: u64) -> Self {
        self.num_occurrences = count;
        self
    }

    /// Attach a metadata entry
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key, value);
        self
    }
}

/// Ordered collection of samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Sample>", into = "Vec<Sample>")]
pub struct SampleSet {
    samples: Arc<Vec<Sample>>,
}

impl SampleSet {
    /// Create empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of samples
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Iterate samples in order
    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    /// Get sample by position
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    /// Lowest-energy sample, earliest on ties
    #[must_use]
    pub fn first(&self) -> Option<&Sample> {
        self.samples.iter().fold(None, |best: Option<&Sample>, sample| match best {
            Some(current) if sample.energy.total_cmp(&current.energy) != Ordering::Less => {
                Some(current)
            }
            _ => Some(sample),
        })
    }

    /// Energies in sample order
    #[must_use]
    pub fn energies(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.energy).collect()
    }

    /// Append a sample
    pub fn push(&mut self, sample: Sample) {
        Arc::make_mut(&mut self.samples).push(sample);
    }

    /// Mutable access to the samples, copying shared storage first
    pub fn make_mut(&mut self) -> &mut Vec<Sample> {
        Arc::make_mut(&mut self.samples)
    }

    /// Check whether two sets still share storage
    #[inline]
    #[must_use]
    pub fn shares_storage(&self, other: &SampleSet) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }

    /// Concatenate sets in argument order
    #[must_use]
    pub fn concat<'a>(sets: impl IntoIterator<Item = &'a SampleSet>) -> SampleSet {
        let samples: Vec<Sample> = sets
            .into_iter()
            .flat_map(|set| set.samples.iter().cloned())
            .collect();
        SampleSet::from(samples)
    }

    /// Fold samples with identical assignments
    ///
    /// Occurrence counts are summed and metadata merged; the first-seen
    /// position of each assignment is kept.
    #[must_use]
    pub fn aggregate(&self) -> SampleSet {
        let mut positions: HashMap<&[i64], usize> = HashMap::new();
        let mut aggregated: Vec<Sample> = Vec::with_capacity(self.samples.len());

        for sample in self.samples.iter() {
            match positions.get(sample.values.as_slice()) {
                Some(&pos) => {
                    let existing = &mut aggregated[pos];
                    existing.num_occurrences += sample.num_occurrences;
                    existing.metadata.merge(&sample.metadata);
                }
                None => {
                    positions.insert(sample.values.as_slice(), aggregated.len());
                    aggregated.push(sample.clone());
                }
            }
        }

        SampleSet::from(aggregated)
    }
}

impl From<Vec<Sample>> for SampleSet {
    fn from(samples: Vec<Sample>) -> Self {
        Self {
            samples: Arc::new(samples),
        }
    }
}

impl From<SampleSet> for Vec<Sample> {
    fn from(set: SampleSet) -> Self {
        Arc::try_unwrap(set.samples).unwrap_or_else(|shared| (*shared).clone())
    }
}

impl FromIterator<Sample> for SampleSet {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        SampleSet::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl<'a> IntoIterator for &'a SampleSet {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
