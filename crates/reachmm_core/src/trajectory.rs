use crate::error::{ReachError, Result};
use crate::interval::IntervalBox;
use crate::traits::{cast, Endpoint};
use serde::{Deserialize, Serialize};

/// Time-indexed sequence of reachable-set enclosures.
///
/// Entry `k` bounds every state reachable at `times()[k]`. Entries are only
/// appended by the propagator.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory<T: Endpoint = f64> {
    times: Vec<T>,
    boxes: Vec<IntervalBox<T>>,
}

/// Flat, serializable form of one trajectory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub time: f64,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl<T: Endpoint> Default for Trajectory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Endpoint> Trajectory<T> {
    pub fn new() -> Self {
        Self {
            times: Vec::new(),
            boxes: Vec::new(),
        }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            times: Vec::with_capacity(capacity),
            boxes: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, time: T, enclosure: IntervalBox<T>) {
        self.times.push(time);
        self.boxes.push(enclosure);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.times.truncate(len);
        self.boxes.truncate(len);
    }

    pub fn times(&self) -> &[T] {
        &self.times
    }

    pub fn boxes(&self) -> &[IntervalBox<T>] {
        &self.boxes
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<(T, &IntervalBox<T>)> {
        Some((*self.times.get(index)?, self.boxes.get(index)?))
    }

    pub fn iter(&self) -> impl Iterator<Item = (T, &IntervalBox<T>)> + '_ {
        self.times.iter().copied().zip(self.boxes.iter())
    }

    pub fn final_box(&self) -> Option<&IntervalBox<T>> {
        self.boxes.last()
    }

    /// Whether the enclosure at step `index` contains the state `x`.
    pub fn contains_state(&self, index: usize, x: &[T]) -> bool {
        self.boxes
            .get(index)
            .is_some_and(|enclosure| enclosure.contains_slice(x))
    }

    /// Stepwise hull of two trajectories on the same time grid.
    pub fn hull(&self, other: &Self) -> Result<Self> {
        ReachError::check_len("trajectory length", self.len(), other.len())?;
        let mut out = Self::with_capacity(self.len());
        for (k, ((t, a), (s, b))) in self.iter().zip(other.iter()).enumerate() {
            if t != s {
                return Err(ReachError::domain(
                    "hull",
                    format!("time grids differ at step {k}: {t} vs {s}"),
                ));
            }
            out.push(t, a.hull(b)?);
        }
        Ok(out)
    }

    pub fn records(&self) -> Vec<TrajectoryRecord> {
        let to_f64 = |v: &T| v.to_f64().unwrap_or(f64::NAN);
        self.iter()
            .map(|(t, enclosure)| TrajectoryRecord {
                time: to_f64(&t),
                lower: enclosure.lower_slice().iter().map(to_f64).collect(),
                upper: enclosure.upper_slice().iter().map(to_f64).collect(),
            })
            .collect()
    }

    /// Rebuilds a trajectory of one-dimensional boxes, revalidating every entry.
    pub fn from_records(records: &[TrajectoryRecord]) -> Result<Self> {
        let mut out = Self::with_capacity(records.len());
        for record in records {
            let lower: Vec<T> = record.lower.iter().map(|&v| cast(v)).collect();
            let upper: Vec<T> = record.upper.iter().map(|&v| cast(v)).collect();
            out.push(cast(record.time), IntervalBox::from_slices(&lower, &upper)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trajectory(entries: &[(f64, f64, f64)]) -> Trajectory {
        let mut out = Trajectory::new();
        for &(t, lo, hi) in entries {
            out.push(t, IntervalBox::from_slices(&[lo], &[hi]).unwrap());
        }
        out
    }

    #[test]
    fn accessors() {
        let traj = trajectory(&[(0.0, 0.9, 1.1), (0.5, 0.5, 0.7)]);
        assert_eq!(traj.len(), 2);
        assert_eq!(traj.times(), &[0.0, 0.5]);
        assert!(traj.contains_state(1, &[0.6]));
        assert!(!traj.contains_state(1, &[0.8]));
        assert!(!traj.contains_state(5, &[0.6]));
        assert_eq!(traj.final_box().unwrap().component(0), Some((0.5, 0.7)));
        assert_eq!(traj.get(0).map(|(t, _)| t), Some(0.0));
    }

    #[test]
    fn hull_requires_matching_grids() {
        let a = trajectory(&[(0.0, 0.0, 1.0), (1.0, 0.0, 1.0)]);
        let b = trajectory(&[(0.0, 2.0, 3.0), (1.0, -1.0, 0.5)]);
        let h = a.hull(&b).unwrap();
        assert_eq!(h.boxes()[0].component(0), Some((0.0, 3.0)));
        assert_eq!(h.boxes()[1].component(0), Some((-1.0, 1.0)));

        let shifted = trajectory(&[(0.0, 0.0, 1.0), (2.0, 0.0, 1.0)]);
        assert!(a.hull(&shifted).is_err());
        assert!(a.hull(&trajectory(&[(0.0, 0.0, 1.0)])).is_err());
    }

    #[test]
    fn records_serialize_as_json() {
        let traj = trajectory(&[(0.0, 0.9, 1.1), (0.01, 0.89, 1.09)]);
        let json = serde_json::to_string(&traj.records()).unwrap();
        assert!(json.contains("\"lower\":[0.9]"));
        let parsed: Vec<TrajectoryRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(Trajectory::from_records(&parsed).unwrap(), traj);

        let crossed = vec![TrajectoryRecord {
            time: 0.0,
            lower: vec![1.0],
            upper: vec![0.0],
        }];
        assert!(Trajectory::<f64>::from_records(&crossed).is_err());
    }
}
