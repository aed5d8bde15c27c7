use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A row that made it through extraction and geocoding. Only constructible with
/// in-range coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPoint {
    id: String,
    description: String,
    coordinates: Coordinates,
}

impl ResolvedPoint {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        coordinates: Coordinates,
    ) -> Option<Self> {
        if !coordinates.is_valid() {
            return None;
        }
        Some(Self {
            id: id.into(),
            description: description.into(),
            coordinates,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn lat(&self) -> f64 {
        self.coordinates.lat
    }

    pub fn lng(&self) -> f64 {
        self.coordinates.lng
    }

    pub fn detail(&self) -> MarkerDetail {
        MarkerDetail {
            heading: self.id.clone(),
            body: self.description.clone(),
        }
    }
}

/// Opaque reference handed back by a map sink. The core never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MarkerHandle(u64);

impl MarkerHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Content of the popup shown when a marker is clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkerDetail {
    pub heading: String,
    pub body: String,
}

pub trait MapSink: Send + Sync {
    fn add_marker(&self, point: &ResolvedPoint) -> MarkerHandle;

    fn attach_detail(&self, handle: MarkerHandle, detail: MarkerDetail);
}

#[derive(Debug, Default)]
pub struct NullMapSink;

impl MapSink for NullMapSink {
    fn add_marker(&self, _point: &ResolvedPoint) -> MarkerHandle {
        MarkerHandle::new(0)
    }

    fn attach_detail(&self, _handle: MarkerHandle, _detail: MarkerDetail) {}
}

/// Sink for headless runs: logs every placement and numbers the handles.
#[derive(Debug, Default)]
pub struct TracingMapSink {
    next_handle: AtomicU64,
}

impl MapSink for TracingMapSink {
    fn add_marker(&self, point: &ResolvedPoint) -> MarkerHandle {
        let handle = MarkerHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        debug!(
            target: "map_sink",
            id = point.id(),
            lat = point.lat(),
            lng = point.lng(),
            handle = handle.raw(),
            "placed marker"
        );
        handle
    }

    fn attach_detail(&self, handle: MarkerHandle, detail: MarkerDetail) {
        trace!(
            target: "map_sink",
            handle = handle.raw(),
            heading = %detail.heading,
            "attached marker detail"
        );
    }
}

/// Append-only collection of resolved points, shared between the batch coordinator,
/// the map sink and exports.
#[derive(Clone)]
pub struct MarkerStore {
    points: Arc<Mutex<Vec<ResolvedPoint>>>,
    sink: Arc<dyn MapSink>,
}

impl MarkerStore {
    pub fn new(sink: Arc<dyn MapSink>) -> Self {
        Self {
            points: Arc::new(Mutex::new(Vec::new())),
            sink,
        }
    }

    pub fn detached() -> Self {
        Self::new(Arc::new(NullMapSink))
    }

    pub fn append(&self, point: ResolvedPoint) -> MarkerHandle {
        let handle = self.sink.add_marker(&point);
        self.sink.attach_detail(handle, point.detail());
        self.points.lock().push(point);
        handle
    }

    pub fn all(&self) -> Vec<ResolvedPoint> {
        self.points.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.points.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.lock().is_empty()
    }

    pub fn clear(&self) {
        self.points.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        placed: Mutex<Vec<String>>,
        details: Mutex<Vec<(MarkerHandle, MarkerDetail)>>,
    }

    impl MapSink for RecordingSink {
        fn add_marker(&self, point: &ResolvedPoint) -> MarkerHandle {
            let mut placed = self.placed.lock();
            placed.push(point.id().to_string());
            MarkerHandle::new(placed.len() as u64 * 10)
        }

        fn attach_detail(&self, handle: MarkerHandle, detail: MarkerDetail) {
            self.details.lock().push((handle, detail));
        }
    }

    fn point(id: &str, lat: f64, lng: f64) -> ResolvedPoint {
        ResolvedPoint::new(id, format!("row {id}"), Coordinates::new(lat, lng)).unwrap()
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(ResolvedPoint::new("a", "", Coordinates::new(90.1, 0.0)).is_none());
        assert!(ResolvedPoint::new("a", "", Coordinates::new(0.0, -180.5)).is_none());
        assert!(ResolvedPoint::new("a", "", Coordinates::new(f64::NAN, 0.0)).is_none());
        assert!(ResolvedPoint::new("a", "", Coordinates::new(-90.0, 180.0)).is_some());
    }

    #[test]
    fn append_forwards_to_sink_and_keeps_order() {
        let sink = Arc::new(RecordingSink::default());
        let store = MarkerStore::new(sink.clone());

        let first = store.append(point("1", 48.86, 2.35));
        let second = store.append(point("2", 51.5, -0.12));

        assert_ne!(first, second);
        let ids: Vec<_> = store.all().iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(*sink.placed.lock(), vec!["1", "2"]);

        let details = sink.details.lock();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].0, first);
        assert_eq!(details[0].1.heading, "1");
        assert_eq!(details[0].1.body, "row 1");
    }

    #[test]
    fn clones_share_points_until_cleared() {
        let store = MarkerStore::detached();
        let view = store.clone();
        store.append(point("1", 0.0, 0.0));
        assert_eq!(view.len(), 1);
        view.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn tracing_sink_numbers_handles() {
        let sink = TracingMapSink::default();
        let a = sink.add_marker(&point("a", 1.0, 1.0));
        let b = sink.add_marker(&point("b", 2.0, 2.0));
        assert_eq!(a.raw(), 1);
        assert_eq!(b.raw(), 2);
    }
}
