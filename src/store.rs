//! Per-channel plot artifacts over a rendering surface.
//!
//! The store never draws anything itself. It keeps, per concrete channel, the
//! ordered list of artifact handles it created on a [`PlotSurface`] and turns
//! `plot`/`update`/`try_plot`/`clear` requests into surface calls. Every
//! operation accepts a concrete channel or `ALL`, which fans out to each
//! concrete channel in turn.

use crate::channel::ChannelType;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Opaque handle of one artifact on a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactHandle(pub u64);

/// Rendering boundary.
pub trait PlotSurface {
    /// Creates a new artifact showing `x`/`y` for `channel`.
    fn create_artifact(&mut self, channel: ChannelType, x: &[f64], y: &[f64]) -> ArtifactHandle;

    /// Replaces the data of an existing artifact.
    fn update_artifact(&mut self, handle: ArtifactHandle, x: &[f64], y: &[f64]);

    /// Removes an artifact from the surface.
    fn remove_artifact(&mut self, handle: ArtifactHandle);
}

/// Data currently shown by a recorded artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedArtifact {
    /// Channel the artifact was created for
    pub channel: ChannelType,
    /// Current abscissa data
    pub x: Vec<f64>,
    /// Current ordinate data
    pub y: Vec<f64>,
}

/// In-memory surface that records every call.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    next_id: u64,
    artifacts: BTreeMap<ArtifactHandle, RecordedArtifact>,
    creates: usize,
    updates: usize,
    removes: usize,
}

impl RecordingSurface {
    /// Creates an empty surface.
    pub fn new() -> Self {
        Self::default()
    }

    /// Artifact behind `handle`, if it is still alive.
    pub fn artifact(&self, handle: ArtifactHandle) -> Option<&RecordedArtifact> {
        self.artifacts.get(&handle)
    }

    /// Live artifacts, oldest first.
    pub fn artifacts(&self) -> impl Iterator<Item = (&ArtifactHandle, &RecordedArtifact)> {
        self.artifacts.iter()
    }

    /// Number of live artifacts.
    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    /// Calls to `create_artifact` so far.
    pub fn create_count(&self) -> usize {
        self.creates
    }

    /// Calls to `update_artifact` that hit a live artifact.
    pub fn update_count(&self) -> usize {
        self.updates
    }

    /// Calls to `remove_artifact` that hit a live artifact.
    pub fn remove_count(&self) -> usize {
        self.removes
    }
}

impl PlotSurface for RecordingSurface {
    fn create_artifact(&mut self, channel: ChannelType, x: &[f64], y: &[f64]) -> ArtifactHandle {
        self.next_id += 1;
        let handle = ArtifactHandle(self.next_id);
        self.artifacts.insert(
            handle,
            RecordedArtifact {
                channel,
                x: x.to_vec(),
                y: y.to_vec(),
            },
        );
        self.creates += 1;
        handle
    }

    fn update_artifact(&mut self, handle: ArtifactHandle, x: &[f64], y: &[f64]) {
        if let Some(artifact) = self.artifacts.get_mut(&handle) {
            artifact.x = x.to_vec();
            artifact.y = y.to_vec();
            self.updates += 1;
        }
    }

    fn remove_artifact(&mut self, handle: ArtifactHandle) {
        if self.artifacts.remove(&handle).is_some() {
            self.removes += 1;
        }
    }
}

/// Channel → artifact handles, over a surface `S`.
pub struct ChannelSeriesStore<S: PlotSurface> {
    surface: S,
    handles: HashMap<ChannelType, Vec<ArtifactHandle>>,
}

impl<S: PlotSurface> ChannelSeriesStore<S> {
    /// Creates a store without artifacts.
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            handles: HashMap::new(),
        }
    }

    /// Creates a new artifact per selected channel.
    pub fn plot(&mut self, x: &[f64], y: &[f64], channel: ChannelType) {
        for ch in channel.expand() {
            let handle = self.surface.create_artifact(ch, x, y);
            self.handles.entry(ch).or_default().push(handle);
        }
    }

    /// Replaces the data of the newest artifact per selected channel.
    ///
    /// A channel without artifacts is skipped.
    pub fn update(&mut self, x: &[f64], y: &[f64], channel: ChannelType) {
        for ch in channel.expand() {
            match self.handles.get(&ch).and_then(|h| h.last()) {
                Some(&handle) => self.surface.update_artifact(handle, x, y),
                None => debug!("No active artifact for {}, update ignored", ch),
            }
        }
    }

    /// Updates the newest artifact, creating one first if a channel has none.
    pub fn try_plot(&mut self, x: &[f64], y: &[f64], channel: ChannelType) {
        for ch in channel.expand() {
            if self.handle_count(ch) == 0 {
                self.plot(x, y, ch);
            } else {
                self.update(x, y, ch);
            }
        }
    }

    /// Removes every artifact of the selected channels.
    pub fn clear(&mut self, channel: ChannelType) {
        for ch in channel.expand() {
            if let Some(handles) = self.handles.get_mut(&ch) {
                for handle in handles.drain(..) {
                    self.surface.remove_artifact(handle);
                }
            }
        }
    }

    /// Number of live artifacts of the selected channels.
    pub fn handle_count(&self, channel: ChannelType) -> usize {
        channel
            .expand()
            .iter()
            .map(|ch| self.handles.get(ch).map_or(0, Vec::len))
            .sum()
    }

    /// Live handles of the selected channels, oldest first per channel.
    pub fn handles(&self, channel: ChannelType) -> Vec<ArtifactHandle> {
        channel
            .expand()
            .iter()
            .flat_map(|ch| self.handles.get(ch).into_iter().flatten().copied())
            .collect()
    }

    /// The rendering surface.
    pub fn surface(&self) -> &S {
        &self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ChannelSeriesStore<RecordingSurface> {
        ChannelSeriesStore::new(RecordingSurface::new())
    }

    #[test]
    fn try_plot_creates_once_then_updates() {
        let mut store = store();
        for n in 1..=5 {
            let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
            store.try_plot(&x, &x, ChannelType::Lac);
        }

        assert_eq!(store.handle_count(ChannelType::Lac), 1);
        assert_eq!(store.surface().create_count(), 1);
        assert_eq!(store.surface().update_count(), 4);
        let handle = store.handles(ChannelType::Lac)[0];
        assert_eq!(store.surface().artifact(handle).unwrap().x.len(), 5);
    }

    #[test]
    fn all_selector_fans_out() {
        let mut store = store();
        store.plot(&[1.0], &[2.0], ChannelType::All);
        assert_eq!(store.handle_count(ChannelType::Vac), 1);
        assert_eq!(store.handle_count(ChannelType::Lac), 1);
        assert_eq!(store.handle_count(ChannelType::All), 2);

        store.update(&[1.0, 2.0], &[2.0, 3.0], ChannelType::All);
        assert!(store
            .surface()
            .artifacts()
            .all(|(_, artifact)| artifact.x == vec![1.0, 2.0]));
    }

    #[test]
    fn update_touches_only_newest_handle() {
        let mut store = store();
        store.plot(&[1.0], &[1.0], ChannelType::Vac);
        store.plot(&[2.0], &[2.0], ChannelType::Vac);
        store.update(&[9.0], &[9.0], ChannelType::Vac);

        let handles = store.handles(ChannelType::Vac);
        assert_eq!(store.surface().artifact(handles[0]).unwrap().x, vec![1.0]);
        assert_eq!(store.surface().artifact(handles[1]).unwrap().x, vec![9.0]);
    }

    #[test]
    fn update_without_artifact_is_noop() {
        let mut store = store();
        store.update(&[1.0], &[1.0], ChannelType::Lac);
        assert_eq!(store.handle_count(ChannelType::All), 0);
        assert_eq!(store.surface().update_count(), 0);
    }

    #[test]
    fn clear_removes_everything_and_is_idempotent() {
        let mut store = store();
        store.plot(&[1.0], &[1.0], ChannelType::All);
        store.plot(&[1.0], &[1.0], ChannelType::Lac);
        store.clear(ChannelType::All);
        assert_eq!(store.handle_count(ChannelType::All), 0);
        assert_eq!(store.surface().remove_count(), 3);

        store.clear(ChannelType::All);
        assert_eq!(store.surface().remove_count(), 3);
        assert_eq!(store.surface().artifact_count(), 0);
    }
}
