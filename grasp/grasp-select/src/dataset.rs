//! Objects to label and the sources they are read from.
//!
//! Storage is someone else's problem: an [`ObjectSource`] only lists keys
//! and loads one object at a time. [`ObjectSequence`] walks a key range
//! lazily and steps over objects that fail to load.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::candidate::GraspCandidate;
use crate::error::{SelectError, SelectResult};

/// An object together with its candidate grasps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraspableObject {
    /// Key of the object in its dataset.
    pub key: String,
    /// Dataset category (may be empty).
    #[serde(default)]
    pub category: String,
    /// Object-level shape descriptor used to find similar objects.
    #[serde(default)]
    pub features: Option<DVector<f64>>,
    /// Candidate grasps.
    #[serde(default)]
    pub candidates: Vec<GraspCandidate>,
}

impl GraspableObject {
    /// Creates an object with no descriptor and no grasps.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            category: String::new(),
            features: None,
            candidates: Vec::new(),
        }
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Sets the object-level descriptor.
    #[must_use]
    pub fn with_features(mut self, features: DVector<f64>) -> Self {
        self.features = Some(features);
        self
    }

    /// Sets the candidate grasps.
    #[must_use]
    pub fn with_candidates(mut self, candidates: Vec<GraspCandidate>) -> Self {
        self.candidates = candidates;
        self
    }
}

/// A keyed collection of objects, read one at a time.
pub trait ObjectSource {
    /// Object keys in index order.
    fn keys(&self) -> Vec<String>;

    /// Loads one object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is unknown or cannot be read.
    fn load(&self, key: &str) -> SelectResult<GraspableObject>;
}

/// Objects held in memory, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    objects: Vec<GraspableObject>,
}

impl InMemorySource {
    /// Creates a source from objects.
    #[must_use]
    pub fn new(objects: Vec<GraspableObject>) -> Self {
        Self { objects }
    }

    /// Appends an object.
    pub fn push(&mut self, object: GraspableObject) {
        self.objects.push(object);
    }

    /// Number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if the source holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl ObjectSource for InMemorySource {
    fn keys(&self) -> Vec<String> {
        self.objects.iter().map(|o| o.key.clone()).collect()
    }

    fn load(&self, key: &str) -> SelectResult<GraspableObject> {
        self.objects
            .iter()
            .find(|o| o.key == key)
            .cloned()
            .ok_or_else(|| SelectError::object_unavailable(key, "not in source"))
    }
}

/// Lazy walk over a range of a source's keys.
///
/// Objects that fail to load are logged and skipped; the sequence ends with
/// `None` once the range is exhausted, however many loads failed.
///
/// # Example
///
/// ```
/// use grasp_select::{GraspableObject, InMemorySource, ObjectSequence};
///
/// let source = InMemorySource::new(vec![
///     GraspableObject::new("bottle"),
///     GraspableObject::new("mug"),
///     GraspableObject::new("drill"),
/// ]);
///
/// let keys: Vec<String> = ObjectSequence::new(&source, 1, None).map(|o| o.key).collect();
/// assert_eq!(keys, vec!["mug", "drill"]);
/// ```
pub struct ObjectSequence<'a, S: ObjectSource + ?Sized> {
    source: &'a S,
    keys: Vec<String>,
    position: usize,
    skipped: Vec<String>,
}

impl<'a, S: ObjectSource + ?Sized> ObjectSequence<'a, S> {
    /// Walks keys `start..end` (to the last key when `end` is `None`).
    /// Out-of-range bounds are clamped.
    pub fn new(source: &'a S, start: usize, end: Option<usize>) -> Self {
        let mut keys = source.keys();
        let end = end.map_or(keys.len(), |e| e.min(keys.len()));
        let start = start.min(end);
        keys.truncate(end);
        keys.drain(..start);
        Self {
            source,
            keys,
            position: 0,
            skipped: Vec::new(),
        }
    }

    /// Keys that failed to load so far.
    #[must_use]
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Keys not yet visited.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.keys.len() - self.position
    }
}

impl<S: ObjectSource + ?Sized> Iterator for ObjectSequence<'_, S> {
    type Item = GraspableObject;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(key) = self.keys.get(self.position) {
            self.position += 1;
            match self.source.load(key) {
                Ok(object) => {
                    debug!(key = %key, "Loaded object");
                    return Some(object);
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "Skipping unreadable object");
                    self.skipped.push(key.clone());
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}
