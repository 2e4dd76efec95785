//! Distance-segment reconstruction
//!
//! Batch counterpart to the streaming geofence detector: turns the raw
//! enter/exit markers it appended into inside/outside segments. Pure and
//! deterministic, so re-running over the same markers yields identical
//! output.
//!
//! An enter without a later exit becomes an open inside segment. An exit
//! without a later enter produces nothing: the device is presumed still
//! outside with no further data. Duplicate enters without an intervening
//! exit each pair with the same closing exit; that is an upstream
//! data-quality problem, not something reconstruction repairs.

use crate::domain::marker::{DistanceMarker, DistanceSegment, MarkerType, SegmentType};
use crate::domain::Position;
use rustc_hash::FxHashMap;

/// Reconstruct segments from an unordered marker collection.
pub fn reconstruct_segments(markers: &[DistanceMarker]) -> Vec<DistanceSegment> {
    let mut groups: FxHashMap<(i64, i64), Vec<&DistanceMarker>> = FxHashMap::default();
    for marker in markers {
        groups.entry((marker.device_id.0, marker.geofence_id.0)).or_default().push(marker);
    }

    let mut segments = Vec::new();
    for group in groups.values_mut() {
        group.sort_by_key(|m| m.position_id);
        reconstruct_group(group, &mut segments);
    }

    segments.sort_by(|a, b| {
        (a.device_id.0, a.geofence_id.0, a.enter_time)
            .cmp(&(b.device_id.0, b.geofence_id.0, b.enter_time))
    });
    segments
}

fn reconstruct_group(group: &[&DistanceMarker], segments: &mut Vec<DistanceSegment>) {
    for (i, marker) in group.iter().enumerate() {
        match marker.marker_type {
            MarkerType::Enter => {
                match next_of(group, i, MarkerType::Exit) {
                    Some(exit) => segments.push(closed(marker, exit, SegmentType::Inside)),
                    None => segments.push(open_inside(marker)),
                }
            }
            MarkerType::Exit => {
                // No later enter: still outside, nothing to record.
                if let Some(enter) = next_of(group, i, MarkerType::Enter) {
                    segments.push(closed(marker, enter, SegmentType::Outside));
                }
            }
        }
    }
}

fn next_of<'a>(
    group: &[&'a DistanceMarker],
    after: usize,
    marker_type: MarkerType,
) -> Option<&'a DistanceMarker> {
    group[after + 1..].iter().find(|m| m.marker_type == marker_type).copied()
}

fn closed(
    start: &DistanceMarker,
    end: &DistanceMarker,
    segment_type: SegmentType,
) -> DistanceSegment {
    DistanceSegment {
        device_id: start.device_id,
        geofence_id: start.geofence_id,
        segment_type,
        enter_position_id: start.position_id,
        exit_position_id: Some(end.position_id),
        enter_time: start.fix_time,
        exit_time: Some(end.fix_time),
        odo_start: start.total_distance,
        odo_end: Some(end.total_distance),
        distance: Some(end.total_distance - start.total_distance),
        open: false,
    }
}

fn open_inside(start: &DistanceMarker) -> DistanceSegment {
    DistanceSegment {
        device_id: start.device_id,
        geofence_id: start.geofence_id,
        segment_type: SegmentType::Inside,
        enter_position_id: start.position_id,
        exit_position_id: None,
        enter_time: start.fix_time,
        exit_time: None,
        odo_start: start.total_distance,
        odo_end: None,
        distance: None,
        open: true,
    }
}

/// Fill an open segment's running totals from the device's latest position.
/// The segment stays open; the end fields are a projection, not a closure.
/// Ignored when the odometer reads behind the segment start (device swap or
/// odometer reset).
pub fn project_open_segment(segment: &mut DistanceSegment, latest: &Position) {
    if !segment.open || segment.distance.is_some() || latest.device_id != segment.device_id {
        return;
    }
    let total = latest.total_distance();
    if total < segment.odo_start {
        return;
    }
    segment.exit_position_id = Some(latest.id);
    segment.exit_time = Some(latest.fix_time);
    segment.odo_end = Some(total);
    segment.distance = Some(total - segment.odo_start);
}
