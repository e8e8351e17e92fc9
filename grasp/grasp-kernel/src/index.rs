//! KD-tree search over grasp feature vectors.
//!
//! Correlation between grasps is only propagated within a kernel's error
//! radius, so the samplers never need the full pairwise graph. These indices
//! answer the local queries instead: everything within a radius, or the `k`
//! closest vectors.
//!
//! Queries go through `kiddo` with a slightly enlarged radius and are then
//! filtered against the exact Euclidean distance, so results contain no
//! false positives and no false negatives at the boundary.
//!
//! Repeated vectors share one tree position. When too many positions share a
//! coordinate on one axis, the tree is built in a reflected frame, and if that
//! does not help either the index scans.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::DVector;
use tracing::debug;

use crate::error::{KernelError, KernelResult};
use crate::kernel::{FeatureMap, swap_halves};

/// Relative slack applied to tree queries before exact filtering.
const SEARCH_SLACK: f64 = 1e-9;

/// Positions allowed to share one coordinate value on an axis.
///
/// `kiddo` splits a full bucket of 32 at its middle and only handles runs of
/// equal values that fit in the lower half.
const MAX_SHARED_COORDINATE: usize = 16;

/// A feature vector returned by a neighbor query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position of the vector in the training sequence.
    pub index: usize,
    /// Euclidean distance from the query.
    pub distance: f64,
}

/// Nearest-neighbor queries over a trained set of feature vectors.
///
/// Results are sorted by ascending distance, ties broken by insertion order,
/// and contain each trained vector at most once.
pub trait NeighborSearch: Send + Sync {
    /// Builds the index from scratch, discarding anything trained before.
    ///
    /// # Errors
    ///
    /// Returns an error if any vector has the wrong dimension or contains a
    /// non-finite component. The index is left unchanged in that case.
    fn train(&mut self, features: &[DVector<f64>]) -> KernelResult<()>;

    /// Number of trained feature vectors.
    fn len(&self) -> usize;

    /// Returns `true` if nothing has been trained.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the trained feature vector at `index`.
    fn feature(&self, index: usize) -> Option<&DVector<f64>>;

    /// All trained vectors within `radius` of `query` (inclusive).
    ///
    /// # Errors
    ///
    /// Returns an error if `radius` is negative or not finite, or if `query`
    /// has the wrong dimension or non-finite components.
    fn within_distance(&self, query: &DVector<f64>, radius: f64) -> KernelResult<Vec<Neighbor>>;

    /// Indices of all trained vectors within `radius` of `query`.
    ///
    /// # Errors
    ///
    /// See [`NeighborSearch::within_distance`].
    fn within_distance_indices(
        &self,
        query: &DVector<f64>,
        radius: f64,
    ) -> KernelResult<Vec<usize>> {
        Ok(self
            .within_distance(query, radius)?
            .into_iter()
            .map(|n| n.index)
            .collect())
    }

    /// The `k` trained vectors closest to `query`.
    ///
    /// Returns fewer than `k` neighbors only when fewer are trained.
    ///
    /// # Errors
    ///
    /// Returns an error if `query` has the wrong dimension or non-finite
    /// components.
    fn k_nearest(&self, query: &DVector<f64>, k: usize) -> KernelResult<Vec<Neighbor>>;
}

/// Checks that `features` has `dim` finite components.
fn check_features(features: &DVector<f64>, dim: usize) -> KernelResult<()> {
    if features.is_empty() {
        return Err(KernelError::EmptyFeatureVector);
    }
    if features.len() != dim {
        return Err(KernelError::dimension_mismatch(dim, features.len()));
    }
    if features.iter().any(|x| !x.is_finite()) {
        return Err(KernelError::NonFinite("feature vector"));
    }
    Ok(())
}

/// Converts a feature vector into a fixed-size KD-tree point.
fn to_point<const K: usize>(features: &DVector<f64>) -> KernelResult<[f64; K]> {
    check_features(features, K)?;
    let mut point = [0.0; K];
    point.copy_from_slice(features.as_slice());
    Ok(point)
}

fn validate_radius(radius: f64) -> KernelResult<()> {
    if radius >= 0.0 && radius.is_finite() {
        Ok(())
    } else {
        Err(KernelError::invalid_parameter(format!(
            "search radius must be non-negative and finite, got {radius}"
        )))
    }
}

fn slackened(dist_sq: f64) -> f64 {
    dist_sq.mul_add(1.0 + SEARCH_SLACK, SEARCH_SLACK)
}

fn sort_neighbors(neighbors: &mut [Neighbor]) {
    neighbors.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.index.cmp(&b.index))
    });
}

/// Bit pattern of a coordinate, with `-0.0` folded onto `0.0`.
fn coordinate_key(x: f64) -> u64 {
    (x + 0.0).to_bits()
}

/// Trained points, `copies` consecutive points per feature vector.
struct PointSet {
    points: Vec<DVector<f64>>,
    copies: usize,
}

impl PointSet {
    fn empty(copies: usize) -> Self {
        Self {
            points: Vec::new(),
            copies,
        }
    }

    fn owner_count(&self) -> usize {
        self.points.len() / self.copies
    }

    fn feature(&self, index: usize) -> Option<&DVector<f64>> {
        self.points.get(index.checked_mul(self.copies)?)
    }

    /// Maps point hits to owners, keeping each owner's smallest exact distance.
    fn exact_neighbors(
        &self,
        hits: impl IntoIterator<Item = usize>,
        query: &DVector<f64>,
        radius: f64,
    ) -> Vec<Neighbor> {
        let mut best: BTreeMap<usize, f64> = BTreeMap::new();
        for item in hits {
            let Some(point) = self.points.get(item) else {
                continue;
            };
            let distance = (point - query).norm();
            if distance > radius {
                continue;
            }
            best.entry(item / self.copies)
                .and_modify(|d| *d = d.min(distance))
                .or_insert(distance);
        }

        let mut neighbors: Vec<Neighbor> = best
            .into_iter()
            .map(|(index, distance)| Neighbor { index, distance })
            .collect();
        sort_neighbors(&mut neighbors);
        neighbors
    }

    fn scan_within(&self, query: &DVector<f64>, radius: f64) -> Vec<Neighbor> {
        self.exact_neighbors(0..self.points.len(), query, radius)
    }

    fn scan_nearest(&self, query: &DVector<f64>, k: usize) -> Vec<Neighbor> {
        let mut neighbors = self.exact_neighbors(0..self.points.len(), query, f64::INFINITY);
        neighbors.truncate(k);
        neighbors
    }
}

/// Householder reflection `p - 2 (u . p) u` with a fixed unit normal `u`.
///
/// Distances are preserved, while points that share a coordinate on one axis
/// (binary features, a constant component) get spread out.
struct Reflection<const K: usize> {
    normal: [f64; K],
}

impl<const K: usize> Reflection<K> {
    #[allow(clippy::cast_precision_loss)]
    fn new() -> Self {
        let golden = (1.0 + 5.0_f64.sqrt()) / 2.0;
        let mut normal = [0.0; K];
        for (i, n) in normal.iter_mut().enumerate() {
            *n = 1.0 / (i as f64 + golden);
        }
        let norm = normal.iter().map(|n| n * n).sum::<f64>().sqrt();
        for n in &mut normal {
            *n /= norm;
        }
        Self { normal }
    }

    fn apply(&self, point: &[f64; K]) -> [f64; K] {
        let dot: f64 = point.iter().zip(&self.normal).map(|(p, n)| p * n).sum();
        let mut out = *point;
        for (o, n) in out.iter_mut().zip(&self.normal) {
            *o -= 2.0 * dot * n;
        }
        out
    }
}

/// Largest number of positions sharing one coordinate value on any axis.
fn max_shared_coordinate<const K: usize>(positions: &[[f64; K]]) -> usize {
    (0..K)
        .map(|axis| {
            let mut counts: HashMap<u64, usize> = HashMap::new();
            for p in positions {
                *counts.entry(coordinate_key(p[axis])).or_insert(0) += 1;
            }
            counts.into_values().max().unwrap_or(0)
        })
        .max()
        .unwrap_or(0)
}

/// KD-tree over the distinct positions of a [`PointSet`].
struct TreeSearch<const K: usize> {
    tree: KdTree<f64, K>,
    /// Point indices stored at each distinct tree position.
    slots: Vec<Vec<usize>>,
    frame: Option<Reflection<K>>,
}

impl<const K: usize> TreeSearch<K> {
    /// Builds the tree, or returns `None` when the positions cannot be split
    /// safely on some axis even after reflection.
    fn build(coords: &[[f64; K]]) -> Option<Self> {
        let mut slot_of: BTreeMap<[u64; K], usize> = BTreeMap::new();
        let mut positions: Vec<[f64; K]> = Vec::new();
        let mut slots: Vec<Vec<usize>> = Vec::new();
        for (i, p) in coords.iter().enumerate() {
            let key = p.map(coordinate_key);
            let slot = *slot_of.entry(key).or_insert_with(|| {
                positions.push(*p);
                slots.push(Vec::new());
                slots.len() - 1
            });
            slots[slot].push(i);
        }

        let frame = if max_shared_coordinate(&positions) <= MAX_SHARED_COORDINATE {
            None
        } else {
            let reflection = Reflection::new();
            let reflected: Vec<[f64; K]> = positions.iter().map(|p| reflection.apply(p)).collect();
            if max_shared_coordinate(&reflected) > MAX_SHARED_COORDINATE {
                return None;
            }
            positions = reflected;
            Some(reflection)
        };

        let mut tree: KdTree<f64, K> = KdTree::new();
        for (slot, p) in positions.iter().enumerate() {
            tree.add(p, slot as u64);
        }
        Some(Self { tree, slots, frame })
    }

    fn position(&self, point: &[f64; K]) -> [f64; K] {
        self.frame.as_ref().map_or(*point, |r| r.apply(point))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn points_of(&self, slot: u64) -> &[usize] {
        self.slots.get(slot as usize).map_or(&[], Vec::as_slice)
    }
}

/// Point set with a KD-tree for dimension `K`.
///
/// Sets the tree cannot split fall back to exhaustive scans.
struct PointTree<const K: usize> {
    set: PointSet,
    search: Option<TreeSearch<K>>,
}

impl<const K: usize> PointTree<K> {
    fn empty(copies: usize) -> Self {
        Self {
            set: PointSet::empty(copies),
            search: None,
        }
    }

    fn build(points: Vec<DVector<f64>>, copies: usize) -> KernelResult<Self> {
        let coords = points
            .iter()
            .map(to_point::<K>)
            .collect::<KernelResult<Vec<_>>>()?;

        let search = TreeSearch::build(&coords);
        if search.is_none() {
            debug!(
                dimension = K,
                points = points.len(),
                "too many shared coordinates for a KD-tree, scanning instead"
            );
        }
        Ok(Self {
            set: PointSet { points, copies },
            search,
        })
    }

    fn within(&self, query: &DVector<f64>, radius: f64) -> KernelResult<Vec<Neighbor>> {
        validate_radius(radius)?;
        let point = to_point::<K>(query)?;
        let Some(search) = &self.search else {
            return Ok(self.set.scan_within(query, radius));
        };
        let hits = search
            .tree
            .within::<SquaredEuclidean>(&search.position(&point), slackened(radius * radius));
        let items = hits
            .iter()
            .flat_map(|n| search.points_of(n.item).iter().copied());
        Ok(self.set.exact_neighbors(items, query, radius))
    }

    fn k_nearest(&self, query: &DVector<f64>, k: usize) -> KernelResult<Vec<Neighbor>> {
        let point = to_point::<K>(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some(search) = &self.search else {
            return Ok(self.set.scan_nearest(query, k));
        };

        // Every position holds at least one point, so k * copies positions
        // always cover at least k distinct owners.
        let position = search.position(&point);
        let qty = k.saturating_mul(self.set.copies).min(search.slots.len());
        let nearest = search.tree.nearest_n::<SquaredEuclidean>(&position, qty);
        let Some(kth_sq) = nearest.iter().map(|n| n.distance).reduce(f64::max) else {
            return Ok(Vec::new());
        };

        // Re-query at the k-th distance so that ties resolve by insertion order
        // rather than by tree layout.
        let hits = search
            .tree
            .within::<SquaredEuclidean>(&position, slackened(kth_sq));
        let items = hits
            .iter()
            .flat_map(|n| search.points_of(n.item).iter().copied());
        let mut neighbors = self.set.exact_neighbors(items, query, f64::INFINITY);
        neighbors.truncate(k);
        Ok(neighbors)
    }
}

/// Nearest-neighbor index over feature vectors of dimension `K`.
///
/// # Example
///
/// ```
/// use grasp_kernel::{FeatureIndex, NeighborSearch};
/// use nalgebra::DVector;
///
/// let features = vec![
///     DVector::from_vec(vec![0.0, 0.0]),
///     DVector::from_vec(vec![1.0, 0.1]),
///     DVector::from_vec(vec![5.0, 5.0]),
/// ];
/// let index = FeatureIndex::<2>::with_features(&features).unwrap();
///
/// let close = index
///     .within_distance_indices(&DVector::from_vec(vec![0.0, 0.0]), 1.5)
///     .unwrap();
/// assert_eq!(close, vec![0, 1]);
/// ```
pub struct FeatureIndex<const K: usize> {
    points: PointTree<K>,
}

impl<const K: usize> FeatureIndex<K> {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            points: PointTree::empty(1),
        }
    }

    /// Creates an index trained on `features`.
    ///
    /// # Errors
    ///
    /// See [`NeighborSearch::train`].
    pub fn with_features(features: &[DVector<f64>]) -> KernelResult<Self> {
        let mut index = Self::new();
        index.train(features)?;
        Ok(index)
    }
}

impl<const K: usize> Default for FeatureIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const K: usize> fmt::Debug for FeatureIndex<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureIndex")
            .field("dimension", &K)
            .field("len", &self.len())
            .finish()
    }
}

impl<const K: usize> NeighborSearch for FeatureIndex<K> {
    fn train(&mut self, features: &[DVector<f64>]) -> KernelResult<()> {
        self.points = PointTree::build(features.to_vec(), 1)?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.points.set.owner_count()
    }

    fn feature(&self, index: usize) -> Option<&DVector<f64>> {
        self.points.set.feature(index)
    }

    fn within_distance(&self, query: &DVector<f64>, radius: f64) -> KernelResult<Vec<Neighbor>> {
        self.points.within(query, radius)
    }

    fn k_nearest(&self, query: &DVector<f64>, k: usize) -> KernelResult<Vec<Neighbor>> {
        self.points.k_nearest(query, k)
    }
}

/// Nearest-neighbor index that treats a grasp and its relabeled twin as the
/// same point.
///
/// Each trained vector is indexed together with its alternate ordering; the
/// distance to a trained vector is the smaller of the two.
pub struct SymmetricFeatureIndex<const K: usize> {
    points: PointTree<K>,
    alternate: FeatureMap,
}

impl<const K: usize> SymmetricFeatureIndex<K> {
    /// Creates an empty index that relabels grasps with [`swap_halves`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            points: PointTree::empty(2),
            alternate: Arc::new(swap_halves),
        }
    }

    /// Creates an index trained on `features`.
    ///
    /// # Errors
    ///
    /// See [`NeighborSearch::train`].
    pub fn with_features(features: &[DVector<f64>]) -> KernelResult<Self> {
        let mut index = Self::new();
        index.train(features)?;
        Ok(index)
    }

    /// Replaces the relabeling map. Takes effect on the next
    /// [`NeighborSearch::train`].
    #[must_use]
    pub fn with_alternate(mut self, alternate: FeatureMap) -> Self {
        self.alternate = alternate;
        self
    }
}

impl<const K: usize> Default for SymmetricFeatureIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const K: usize> fmt::Debug for SymmetricFeatureIndex<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricFeatureIndex")
            .field("dimension", &K)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<const K: usize> NeighborSearch for SymmetricFeatureIndex<K> {
    fn train(&mut self, features: &[DVector<f64>]) -> KernelResult<()> {
        let mut points = Vec::with_capacity(features.len() * 2);
        for f in features {
            points.push(f.clone());
            points.push((self.alternate)(f));
        }
        self.points = PointTree::build(points, 2)?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.points.set.owner_count()
    }

    fn feature(&self, index: usize) -> Option<&DVector<f64>> {
        self.points.set.feature(index)
    }

    fn within_distance(&self, query: &DVector<f64>, radius: f64) -> KernelResult<Vec<Neighbor>> {
        self.points.within(query, radius)
    }

    fn k_nearest(&self, query: &DVector<f64>, k: usize) -> KernelResult<Vec<Neighbor>> {
        self.points.k_nearest(query, k)
    }
}

/// Nearest-neighbor index for any feature dimension, answered by scanning.
///
/// Queries are linear in the number of trained vectors. The dimension is
/// fixed by the first trained vector. [`build_feature_index`] uses this index
/// for dimensions outside [`SUPPORTED_DIMENSIONS`].
pub struct ExhaustiveFeatureIndex {
    set: PointSet,
    dimension: Option<usize>,
    alternate: Option<FeatureMap>,
}

impl ExhaustiveFeatureIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            set: PointSet::empty(1),
            dimension: None,
            alternate: None,
        }
    }

    /// Creates an index trained on `features`.
    ///
    /// # Errors
    ///
    /// See [`NeighborSearch::train`].
    pub fn with_features(features: &[DVector<f64>]) -> KernelResult<Self> {
        let mut index = Self::new();
        index.train(features)?;
        Ok(index)
    }

    /// Treats each vector and its image under `alternate` as the same point,
    /// like [`SymmetricFeatureIndex`]. Takes effect on the next
    /// [`NeighborSearch::train`].
    #[must_use]
    pub fn with_alternate(mut self, alternate: FeatureMap) -> Self {
        self.alternate = Some(alternate);
        self
    }

    /// Dimension of the trained vectors, if any were trained.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn check_query(&self, query: &DVector<f64>) -> KernelResult<()> {
        check_features(query, self.dimension.unwrap_or(query.len()))
    }
}

impl Default for ExhaustiveFeatureIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExhaustiveFeatureIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExhaustiveFeatureIndex")
            .field("dimension", &self.dimension)
            .field("len", &self.len())
            .field("symmetric", &self.alternate.is_some())
            .finish()
    }
}

impl NeighborSearch for ExhaustiveFeatureIndex {
    fn train(&mut self, features: &[DVector<f64>]) -> KernelResult<()> {
        let copies = if self.alternate.is_some() { 2 } else { 1 };
        let dimension = features.first().map(DVector::len);
        let mut points = Vec::with_capacity(features.len() * copies);
        for f in features {
            check_features(f, dimension.unwrap_or(f.len()))?;
            points.push(f.clone());
            if let Some(alternate) = &self.alternate {
                let twin = alternate(f);
                check_features(&twin, f.len())?;
                points.push(twin);
            }
        }
        self.set = PointSet { points, copies };
        self.dimension = dimension;
        Ok(())
    }

    fn len(&self) -> usize {
        self.set.owner_count()
    }

    fn feature(&self, index: usize) -> Option<&DVector<f64>> {
        self.set.feature(index)
    }

    fn within_distance(&self, query: &DVector<f64>, radius: f64) -> KernelResult<Vec<Neighbor>> {
        validate_radius(radius)?;
        self.check_query(query)?;
        Ok(self.set.scan_within(query, radius))
    }

    fn k_nearest(&self, query: &DVector<f64>, k: usize) -> KernelResult<Vec<Neighbor>> {
        self.check_query(query)?;
        Ok(self.set.scan_nearest(query, k))
    }
}

macro_rules! for_supported_dimensions {
    ($callback:ident) => {
        $callback!(1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 18, 20, 24, 32, 48, 64)
    };
}

macro_rules! dimension_list {
    ($($k:literal),*) => {
        &[$($k),*]
    };
}

/// Feature dimensions for which [`build_feature_index`] builds a KD-tree.
pub const SUPPORTED_DIMENSIONS: &[usize] = for_supported_dimensions!(dimension_list);

fn train_boxed<const K: usize>(
    features: &[DVector<f64>],
    alternate: Option<FeatureMap>,
) -> KernelResult<Box<dyn NeighborSearch>> {
    match alternate {
        None => Ok(Box::new(FeatureIndex::<K>::with_features(features)?)),
        Some(alternate) => {
            let mut index = SymmetricFeatureIndex::<K>::new().with_alternate(alternate);
            index.train(features)?;
            Ok(Box::new(index))
        }
    }
}

/// Trains an index whose dimension is only known at runtime.
///
/// The dimension is taken from the first feature vector. Dimensions in
/// [`SUPPORTED_DIMENSIONS`] get a KD-tree, any other dimension an
/// [`ExhaustiveFeatureIndex`]. With `alternate` set, each vector and its
/// relabeled twin are indexed as one point.
///
/// # Errors
///
/// Returns an error if `features` is empty or training fails.
pub fn build_feature_index(
    features: &[DVector<f64>],
    alternate: Option<FeatureMap>,
) -> KernelResult<Box<dyn NeighborSearch>> {
    let dim = features
        .first()
        .map(DVector::len)
        .ok_or_else(|| KernelError::invalid_parameter("cannot index an empty feature set"))?;

    macro_rules! dispatch {
        ($($k:literal),*) => {
            match dim {
                $($k => train_boxed::<$k>(features, alternate),)*
                other => {
                    debug!(dimension = other, "no KD-tree for this dimension, scanning instead");
                    let mut index = ExhaustiveFeatureIndex::new();
                    if let Some(alternate) = alternate {
                        index = index.with_alternate(alternate);
                    }
                    index.train(features)?;
                    Ok(Box::new(index))
                }
            }
        };
    }
    for_supported_dimensions!(dispatch)
}
