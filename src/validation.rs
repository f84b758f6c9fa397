//! Loop and anti-fraud checks deciding whether a run may contest a tile.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ValidationConfig;
use crate::geo::{LatLng, Track};

const TELEPORT_THRESHOLD_METERS: f64 = 500.0;
const TELEPORT_WINDOW_SECONDS: i64 = 2;
const MAX_POINTS_PER_SECOND: f64 = 5.0;
const MIN_POINTS_PER_SECOND: f64 = 0.05;
const SPARSE_AFTER_SECONDS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotEnoughPoints,
    NonMonotonicTimestamps,
    DistanceTooShort,
    DurationTooShort,
    LoopNotClosed,
    InsufficientTileCoverage,
    FraudDetected,
    OutsideGameArea,
    NoPrimaryTile,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RejectReason::NotEnoughPoints => "not_enough_points",
            RejectReason::NonMonotonicTimestamps => "non_monotonic_timestamps",
            RejectReason::DistanceTooShort => "distance_too_short",
            RejectReason::DurationTooShort => "duration_too_short",
            RejectReason::LoopNotClosed => "loop_not_closed",
            RejectReason::InsufficientTileCoverage => "insufficient_tile_coverage",
            RejectReason::FraudDetected => "fraud_detected",
            RejectReason::OutsideGameArea => "outside_game_area",
            RejectReason::NoPrimaryTile => "no_primary_tile",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FraudFlag {
    HighSpeedSustained { kmh: f64 },
    Teleport { meters: f64 },
    UnrealisticDensity,
    SparseData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopReport {
    pub valid: bool,
    pub distance_meters: f64,
    pub duration_seconds: i64,
    pub closure_meters: f64,
    pub primary_coverage: f64,
    pub fraud_flags: Vec<FraudFlag>,
    pub reasons: Vec<RejectReason>,
}

impl LoopReport {
    fn rejected(reason: RejectReason) -> Self {
        Self {
            valid: false,
            distance_meters: 0.0,
            duration_seconds: 0,
            closure_meters: 0.0,
            primary_coverage: 0.0,
            fraud_flags: Vec::new(),
            reasons: vec![reason],
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopValidator {
    config: ValidationConfig,
}

impl LoopValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn enforced(&self) -> bool {
        self.config.enforce_loop
    }

    /// `primary` is the contested cell's coverage fraction and centre, when
    /// the track has one.
    pub fn validate(&self, track: &Track, primary: Option<(f64, LatLng)>) -> LoopReport {
        if track.len() < 2 {
            return LoopReport::rejected(RejectReason::NotEnoughPoints);
        }
        if !track.timestamps_monotonic() {
            return LoopReport::rejected(RejectReason::NonMonotonicTimestamps);
        }

        let distance = track.total_distance();
        let duration = track.duration_seconds();
        let closure = track.closure_distance();
        let coverage = primary.map_or(0.0, |(fraction, _)| fraction);
        let fraud_flags = detect_fraud(track, &self.config);

        let mut reasons = Vec::new();
        if distance < self.config.min_loop_distance_meters {
            reasons.push(RejectReason::DistanceTooShort);
        }
        if duration < self.config.min_loop_duration_seconds {
            reasons.push(RejectReason::DurationTooShort);
        }
        if closure > self.config.max_closing_distance_meters {
            reasons.push(RejectReason::LoopNotClosed);
        }
        if coverage < self.config.min_tile_coverage {
            reasons.push(RejectReason::InsufficientTileCoverage);
        }
        if !fraud_flags.is_empty() {
            reasons.push(RejectReason::FraudDetected);
        }
        if let (Some(area), Some((_, center))) = (&self.config.play_area, primary) {
            if !area.contains(center) {
                reasons.push(RejectReason::OutsideGameArea);
            }
        }

        LoopReport {
            valid: reasons.is_empty(),
            distance_meters: distance,
            duration_seconds: duration,
            closure_meters: closure,
            primary_coverage: coverage,
            fraud_flags,
            reasons,
        }
    }
}

pub fn detect_fraud(track: &Track, config: &ValidationConfig) -> Vec<FraudFlag> {
    let mut flags = Vec::new();
    if let Some(flag) = sustained_speed(track, config) {
        flags.push(flag);
    }
    if let Some(flag) = teleport(track) {
        flags.push(flag);
    }
    if let Some(flag) = point_density(track) {
        flags.push(flag);
    }
    flags
}

fn sustained_speed(track: &Track, config: &ValidationConfig) -> Option<FraudFlag> {
    let max_mps = config.max_speed_kmh * 1000.0 / 3600.0;
    let mut fast_for = 0_i64;
    for pair in track.points.windows(2) {
        let seconds = (pair[1].timestamp - pair[0].timestamp).num_seconds();
        if seconds <= 0 {
            continue;
        }
        let speed = pair[0].position.distance_to(&pair[1].position) / seconds as f64;
        if speed > max_mps {
            fast_for += seconds;
            if fast_for >= config.max_speed_duration_seconds {
                return Some(FraudFlag::HighSpeedSustained {
                    kmh: speed * 3.6,
                });
            }
        } else {
            fast_for = 0;
        }
    }
    None
}

fn teleport(track: &Track) -> Option<FraudFlag> {
    track.points.windows(2).find_map(|pair| {
        let seconds = (pair[1].timestamp - pair[0].timestamp).num_seconds();
        let meters = pair[0].position.distance_to(&pair[1].position);
        (seconds <= TELEPORT_WINDOW_SECONDS && meters > TELEPORT_THRESHOLD_METERS)
            .then_some(FraudFlag::Teleport { meters })
    })
}

fn point_density(track: &Track) -> Option<FraudFlag> {
    let duration = track.duration_seconds();
    let per_second = track.len() as f64 / duration.max(1) as f64;
    if per_second > MAX_POINTS_PER_SECOND {
        Some(FraudFlag::UnrealisticDensity)
    } else if duration > SPARSE_AFTER_SECONDS && per_second < MIN_POINTS_PER_SECOND {
        Some(FraudFlag::SparseData)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Bounds, TrackPoint};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    /// Two laps of a circle of `radius` metres, one point every `step` seconds.
    fn circle(radius: f64, points: usize, step: i64) -> Track {
        let center = LatLng::new(-25.43, -49.27);
        let meters_per_deg_lat = 111_195.0;
        let meters_per_deg_lng = meters_per_deg_lat * center.lat.to_radians().cos();
        let track = (0..=points)
            .map(|i| {
                let angle = 4.0 * std::f64::consts::PI * i as f64 / points as f64;
                TrackPoint {
                    position: LatLng::new(
                        center.lat + radius * angle.sin() / meters_per_deg_lat,
                        center.lng + radius * angle.cos() / meters_per_deg_lng,
                    ),
                    timestamp: start() + Duration::seconds(i as i64 * step),
                }
            })
            .collect();
        Track::new(track)
    }

    fn primary() -> Option<(f64, LatLng)> {
        Some((1.0, LatLng::new(-25.43, -49.27)))
    }

    #[test]
    fn accepts_closed_loop_at_running_pace() {
        let track = circle(100.0, 120, 5);
        let report = LoopValidator::new(ValidationConfig::default()).validate(&track, primary());
        assert!(report.valid, "reasons: {:?}", report.reasons);
        assert!(report.distance_meters > 1200.0);
        assert_eq!(report.duration_seconds, 600);
        assert!(report.closure_meters < 1.0);
        assert!(report.fraud_flags.is_empty());
    }

    #[test]
    fn short_or_quick_runs_are_rejected() {
        let track = circle(20.0, 60, 1);
        let report = LoopValidator::new(ValidationConfig::default()).validate(&track, primary());
        assert!(!report.valid);
        assert!(report.reasons.contains(&RejectReason::DistanceTooShort));
        assert!(report.reasons.contains(&RejectReason::DurationTooShort));
    }

    #[test]
    fn low_coverage_and_open_loops_are_rejected() {
        let mut track = circle(100.0, 120, 5);
        let last = track.points.last().copied().unwrap();
        track.points.push(TrackPoint {
            position: LatLng::new(last.position.lat + 0.001, last.position.lng),
            timestamp: last.timestamp + Duration::seconds(60),
        });
        let report = LoopValidator::new(ValidationConfig::default())
            .validate(&track, Some((0.4, LatLng::new(-25.43, -49.27))));
        assert!(report.reasons.contains(&RejectReason::LoopNotClosed));
        assert!(report.reasons.contains(&RejectReason::InsufficientTileCoverage));
    }

    #[test]
    fn flags_teleport_jumps() {
        let mut track = circle(100.0, 120, 5);
        track.points[60].position.lat += 0.01;
        track.points[60].timestamp = track.points[59].timestamp + Duration::seconds(1);
        let flags = detect_fraud(&track, &ValidationConfig::default());
        assert!(flags
            .iter()
            .any(|flag| matches!(flag, FraudFlag::Teleport { meters } if *meters > 500.0)));
    }

    #[test]
    fn flags_sustained_vehicle_speed() {
        // 2 km loop driven in 2 minutes
        let track = circle(160.0, 120, 1);
        let flags = detect_fraud(&track, &ValidationConfig::default());
        assert!(flags
            .iter()
            .any(|flag| matches!(flag, FraudFlag::HighSpeedSustained { .. })));
    }

    #[test]
    fn flags_dense_and_sparse_sampling() {
        let dense = circle(100.0, 120, 0);
        assert!(detect_fraud(&dense, &ValidationConfig::default())
            .contains(&FraudFlag::UnrealisticDensity));

        let sparse = circle(100.0, 10, 120);
        assert!(detect_fraud(&sparse, &ValidationConfig::default()).contains(&FraudFlag::SparseData));
    }

    #[test]
    fn rejects_backwards_time_and_single_points() {
        let mut track = circle(100.0, 120, 5);
        track.points.swap(3, 4);
        let validator = LoopValidator::new(ValidationConfig::default());
        assert_eq!(
            validator.validate(&track, primary()).reasons,
            vec![RejectReason::NonMonotonicTimestamps]
        );
        let single = Track::new(vec![track.points[0]]);
        assert_eq!(
            validator.validate(&single, primary()).reasons,
            vec![RejectReason::NotEnoughPoints]
        );
    }

    #[test]
    fn play_area_limits_where_tiles_count() {
        let config = ValidationConfig {
            play_area: Some(Bounds {
                min_lat: -25.65,
                min_lng: -49.40,
                max_lat: -25.35,
                max_lng: -49.15,
            }),
            ..ValidationConfig::default()
        };
        let validator = LoopValidator::new(config);
        let track = circle(100.0, 120, 5);
        assert!(validator.validate(&track, primary()).valid);
        let report = validator.validate(&track, Some((1.0, LatLng::new(-23.55, -46.63))));
        assert!(report.reasons.contains(&RejectReason::OutsideGameArea));
    }
}
