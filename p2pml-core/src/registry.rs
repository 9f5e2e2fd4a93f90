//! Parse-time bookkeeping: known streams, segments per variant, pending update params.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::protocol::{Segment, Stream, UpdateStreamParams};

/// Streams in registration order.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: Vec<Stream>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, stream: Stream) {
        self.streams.push(stream);
    }

    pub fn find(&self, runtime_id: &str) -> Option<&Stream> {
        self.streams.iter().find(|s| s.runtime_id == runtime_id)
    }

    /// True when `url` is a registered stream or the master playlist that produced one.
    pub fn does_manifest_exist(&self, url: &str) -> bool {
        self.streams
            .iter()
            .any(|s| s.runtime_id == url || s.master_manifest_url.as_deref() == Some(url))
    }

    pub fn all(&self) -> &[Stream] {
        &self.streams
    }

    pub fn clear_all(&mut self) {
        self.streams.clear();
    }
}

/// Segments keyed by variant URL then external id, plus the runtime ids of the
/// latest parsed playlist.
#[derive(Debug, Default)]
pub struct SegmentRepository {
    data: HashMap<String, BTreeMap<u64, Segment>>,
    runtime_ids: HashSet<String>,
}

impl SegmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_runtime_ids(&mut self) {
        self.runtime_ids.clear();
    }

    pub fn add_runtime_id(&mut self, id: String) {
        self.runtime_ids.insert(id);
    }

    pub fn contains_runtime_id(&self, id: &str) -> bool {
        self.runtime_ids.contains(id)
    }

    pub fn add_segment(&mut self, variant_url: &str, segment: Segment) {
        self.data
            .entry(variant_url.to_string())
            .or_default()
            .insert(segment.external_id, segment);
    }

    pub fn is_segment_present(&self, variant_url: &str, external_id: u64) -> bool {
        self.data
            .get(variant_url)
            .is_some_and(|m| m.contains_key(&external_id))
    }

    pub fn get_segment(&self, variant_url: &str, external_id: u64) -> Option<&Segment> {
        self.data.get(variant_url)?.get(&external_id)
    }

    /// Drop segments with external id below `threshold`; returns their runtime ids in id order.
    pub fn remove_obsolete(&mut self, variant_url: &str, threshold: u64) -> Vec<String> {
        let Some(map) = self.data.get_mut(variant_url) else {
            return Vec::new();
        };
        let kept = map.split_off(&threshold);
        let removed = std::mem::replace(map, kept);
        removed.into_values().map(|s| s.runtime_id).collect()
    }

    pub fn segment_count(&self, variant_url: &str) -> usize {
        self.data.get(variant_url).map_or(0, |m| m.len())
    }

    pub fn clear_all(&mut self) {
        self.data.clear();
        self.runtime_ids.clear();
    }
}

/// Latest update params per variant URL.
#[derive(Debug, Default)]
pub struct UpdateParamsStore {
    store: HashMap<String, UpdateStreamParams>,
}

impl UpdateParamsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, variant_url: &str, params: UpdateStreamParams) {
        self.store.insert(variant_url.to_string(), params);
    }

    pub fn get(&self, variant_url: &str) -> Option<&UpdateStreamParams> {
        self.store.get(variant_url)
    }

    pub fn all(&self) -> impl Iterator<Item = &UpdateStreamParams> {
        self.store.values()
    }

    pub fn clear_all(&mut self) {
        self.store.clear();
    }
}
