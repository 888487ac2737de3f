//! Channel neighbourhood graph used for cluster formation.
//!
//! Which channels count as neighbours depends on the sensor layout or
//! parcellation, so it is always supplied by the caller.  Along the frequency
//! axis, consecutive bins of the same channel are always contiguous.
use serde::{Deserialize, Serialize};

use crate::error::{GlmError, Result};

/// Undirected adjacency between `n` channels.
///
/// Deserialisation goes through the same range check as [`Adjacency::from_pairs`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "NeighbourLists")]
pub struct Adjacency {
    neighbours: Vec<Vec<usize>>,
}

#[derive(Deserialize)]
struct NeighbourLists {
    neighbours: Vec<Vec<usize>>,
}

impl TryFrom<NeighbourLists> for Adjacency {
    type Error = GlmError;

    fn try_from(raw: NeighbourLists) -> Result<Self> {
        let pairs: Vec<(usize, usize)> = raw
            .neighbours
            .iter()
            .enumerate()
            .flat_map(|(a, ns)| ns.iter().map(move |&b| (a, b)))
            .collect();
        Self::from_pairs(raw.neighbours.len(), &pairs)
    }
}

impl Adjacency {
    /// No spatial neighbours: clusters only extend along frequency.
    pub fn none(n_channels: usize) -> Self {
        Self { neighbours: vec![vec![]; n_channels] }
    }

    /// Each channel neighbours the previous and next one (e.g. a strip).
    pub fn chain(n_channels: usize) -> Self {
        let pairs: Vec<(usize, usize)> = (1..n_channels).map(|i| (i - 1, i)).collect();
        Self::build(n_channels, &pairs)
    }

    /// Graph from explicit neighbour pairs.  Order within a pair is irrelevant.
    pub fn from_pairs(n_channels: usize, pairs: &[(usize, usize)]) -> Result<Self> {
        for &(a, b) in pairs {
            if a >= n_channels || b >= n_channels {
                return Err(GlmError::config(
                    "adjacency",
                    format!("pair ({a}, {b}) out of range for {n_channels} channels"),
                ));
            }
        }
        Ok(Self::build(n_channels, pairs))
    }

    fn build(n_channels: usize, pairs: &[(usize, usize)]) -> Self {
        let mut neighbours = vec![vec![]; n_channels];
        for &(a, b) in pairs {
            if a == b {
                continue;
            }
            if !neighbours[a].contains(&b) {
                neighbours[a].push(b);
            }
            if !neighbours[b].contains(&a) {
                neighbours[b].push(a);
            }
        }
        for n in neighbours.iter_mut() {
            n.sort_unstable();
        }
        Self { neighbours }
    }

    pub fn n_channels(&self) -> usize {
        self.neighbours.len()
    }

    pub fn neighbours(&self, channel: usize) -> &[usize] {
        &self.neighbours[channel]
    }

    pub fn are_neighbours(&self, a: usize, b: usize) -> bool {
        self.neighbours.get(a).is_some_and(|n| n.binary_search(&b).is_ok())
    }
}
