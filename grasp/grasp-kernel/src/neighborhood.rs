//! Sparse correlation neighborhoods between candidates.
//!
//! For each candidate, the neighborhood lists every other candidate whose
//! kernel value clears the correlation tolerance. Neighbors are searched
//! within the kernel's error radius, so building the rows costs one local
//! query per candidate rather than a full pairwise pass.

use std::collections::VecDeque;

use nalgebra::DVector;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{KernelError, KernelResult};
use crate::index::NeighborSearch;
use crate::kernel::Kernel;

/// One non-zero entry of a sparse kernel row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelEntry {
    /// Candidate index.
    pub index: usize,
    /// Kernel value between the row's candidate and this one.
    pub weight: f64,
}

/// Sparse kernel rows for a candidate set, cut off at a tolerance.
///
/// Built once per candidate set and read-only afterwards, so a single
/// instance can be shared by any number of sampler runs.
///
/// # Example
///
/// ```
/// use grasp_kernel::{CorrelationNeighborhoods, FeatureIndex, SquaredExponentialKernel};
/// use nalgebra::DVector;
///
/// let features = vec![
///     DVector::from_vec(vec![0.0, 0.0]),
///     DVector::from_vec(vec![0.1, 0.0]),
///     DVector::from_vec(vec![9.0, 9.0]),
/// ];
/// let index = FeatureIndex::<2>::with_features(&features).unwrap();
/// let kernel = SquaredExponentialKernel::new(1.0, 1.0).unwrap();
///
/// let hoods = CorrelationNeighborhoods::build(&index, &kernel, &features, 0.5).unwrap();
/// let row: Vec<usize> = hoods.row(0).iter().map(|e| e.index).collect();
/// assert_eq!(row, vec![0, 1]);
/// assert_eq!(hoods.row(2).len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct CorrelationNeighborhoods {
    rows: Vec<Vec<KernelEntry>>,
    tolerance: f64,
    radius: f64,
}

impl CorrelationNeighborhoods {
    /// Builds the sparse rows for `features` using a trained `index`.
    ///
    /// The index must have been trained on `features` in the same order.
    /// A candidate whose neighbor query fails keeps only its own entry.
    ///
    /// # Errors
    ///
    /// Returns an error if `tolerance` is invalid for the kernel, exceeds a
    /// candidate's similarity to itself, or if the index does not cover
    /// `features`.
    pub fn build<S, K>(
        index: &S,
        kernel: &K,
        features: &[DVector<f64>],
        tolerance: f64,
    ) -> KernelResult<Self>
    where
        S: NeighborSearch + ?Sized,
        K: Kernel + ?Sized,
    {
        if index.len() != features.len() {
            return Err(KernelError::invalid_parameter(format!(
                "index holds {} feature vectors but {} were supplied",
                index.len(),
                features.len()
            )));
        }
        let radius = kernel.error_radius(tolerance)?;
        if let Some(i) = features
            .iter()
            .position(|f| kernel.similarity(f, f) < tolerance)
        {
            return Err(KernelError::invalid_parameter(format!(
                "tolerance {tolerance} exceeds the self-similarity of candidate {i}"
            )));
        }

        let rows: Vec<Vec<KernelEntry>> = features
            .par_iter()
            .enumerate()
            .map(|(i, f)| Self::build_row(index, kernel, features, i, f, tolerance, radius))
            .collect();

        let hoods = Self {
            rows,
            tolerance,
            radius,
        };
        info!(
            candidates = features.len(),
            radius,
            tolerance,
            mean_neighbors = hoods.mean_row_len(),
            "Built correlation neighborhoods"
        );
        Ok(hoods)
    }

    fn build_row<S, K>(
        index: &S,
        kernel: &K,
        features: &[DVector<f64>],
        i: usize,
        query: &DVector<f64>,
        tolerance: f64,
        radius: f64,
    ) -> Vec<KernelEntry>
    where
        S: NeighborSearch + ?Sized,
        K: Kernel + ?Sized,
    {
        let self_entry = KernelEntry {
            index: i,
            weight: kernel.similarity(query, query),
        };
        let neighbors = match index.within_distance(query, radius) {
            Ok(neighbors) => neighbors,
            Err(err) => {
                warn!(candidate = i, error = %err, "Neighbor query failed, candidate left uncorrelated");
                return vec![self_entry];
            }
        };

        let mut row: Vec<KernelEntry> = neighbors
            .into_iter()
            .filter(|n| n.index != i)
            .filter_map(|n| {
                let weight = kernel.similarity(query, features.get(n.index)?);
                (weight >= tolerance).then_some(KernelEntry {
                    index: n.index,
                    weight,
                })
            })
            .collect();
        row.push(self_entry);
        row.sort_by_key(|e| e.index);
        row
    }

    /// Sparse row for candidate `i` (empty if out of range), sorted by index.
    #[must_use]
    pub fn row(&self, i: usize) -> &[KernelEntry] {
        self.rows.get(i).map_or(&[], Vec::as_slice)
    }

    /// Expands row `i` into a dense kernel row.
    #[must_use]
    pub fn dense_row(&self, i: usize) -> Vec<f64> {
        let mut dense = vec![0.0; self.rows.len()];
        for entry in self.row(i) {
            dense[entry.index] = entry.weight;
        }
        dense
    }

    /// Number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if there are no candidates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Kernel value below which candidates are uncorrelated.
    #[must_use]
    pub const fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Search radius used to build the rows.
    #[must_use]
    pub const fn radius(&self) -> f64 {
        self.radius
    }

    /// Average number of entries per row, including the diagonal.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_row_len(&self) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        let total: usize = self.rows.iter().map(Vec::len).sum();
        total as f64 / self.rows.len() as f64
    }
}

/// Vertex of the correlation graph used during component labeling.
#[derive(Debug, Default)]
struct GraphNode {
    adjacent: Vec<usize>,
    visited: bool,
}

/// Groups candidates into connected components of the correlation graph.
///
/// Two candidates are connected when either appears in the other's
/// neighborhood. Components are returned in order of their smallest member,
/// each sorted ascending.
///
/// # Example
///
/// ```
/// use grasp_kernel::{correlated_components, CorrelationNeighborhoods, FeatureIndex, SquaredExponentialKernel};
/// use nalgebra::DVector;
///
/// let features = vec![
///     DVector::from_vec(vec![0.0]),
///     DVector::from_vec(vec![8.0]),
///     DVector::from_vec(vec![0.2]),
/// ];
/// let index = FeatureIndex::<1>::with_features(&features).unwrap();
/// let kernel = SquaredExponentialKernel::new(1.0, 1.0).unwrap();
/// let hoods = CorrelationNeighborhoods::build(&index, &kernel, &features, 0.5).unwrap();
///
/// assert_eq!(correlated_components(&hoods), vec![vec![0, 2], vec![1]]);
/// ```
#[must_use]
pub fn correlated_components(neighborhoods: &CorrelationNeighborhoods) -> Vec<Vec<usize>> {
    let n = neighborhoods.len();
    let mut nodes: Vec<GraphNode> = (0..n).map(|_| GraphNode::default()).collect();
    for i in 0..n {
        for entry in neighborhoods.row(i) {
            if entry.index != i && entry.index < n {
                nodes[i].adjacent.push(entry.index);
                nodes[entry.index].adjacent.push(i);
            }
        }
    }

    let mut components = Vec::new();
    for start in 0..n {
        if nodes[start].visited {
            continue;
        }
        nodes[start].visited = true;
        let mut component = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            component.push(current);
            let adjacent = std::mem::take(&mut nodes[current].adjacent);
            for next in adjacent {
                if !nodes[next].visited {
                    nodes[next].visited = true;
                    queue.push_back(next);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }

    debug!(components = components.len(), candidates = n, "Labeled correlated components");
    components
}
