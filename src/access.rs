//! Ground-station access windows.
//!
//! The simulator only consumes windows through [`AccessWindowService`]. The bundled
//! [`GeometricAccessService`] is a spherical-Earth elevation-mask model, adequate for
//! flagging downlinks scheduled outside any pass.

use crate::propagation::{
    julian_date, offset_epoch, seconds_between, EphemerisPoint, Epoch, R_EARTH_KM,
};
use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};

const J2000_JD: f64 = 2_451_545.0;

fn default_min_elevation() -> f64 {
    10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundStation {
    pub id: String,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    #[serde(default)]
    pub altitude_m: f64,
    /// Elevation mask in degrees
    #[serde(default = "default_min_elevation")]
    pub min_elevation_deg: f64,
}

impl GroundStation {
    pub fn new(id: impl Into<String>, latitude_deg: f64, longitude_deg: f64) -> Self {
        Self {
            id: id.into(),
            latitude_deg,
            longitude_deg,
            altitude_m: 0.0,
            min_elevation_deg: default_min_elevation(),
        }
    }

    /// Earth-fixed position on a spherical Earth (km).
    pub fn ecef_position(&self) -> Vector3<f64> {
        let radius = R_EARTH_KM + self.altitude_m / 1000.0;
        let (sin_lat, cos_lat) = self.latitude_deg.to_radians().sin_cos();
        let (sin_lon, cos_lon) = self.longitude_deg.to_radians().sin_cos();
        radius * Vector3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat)
    }

    /// Elevation of the spacecraft above the local horizon, in degrees.
    pub fn elevation_deg(&self, point: &EphemerisPoint) -> f64 {
        let station = self.ecef_position();
        let spacecraft = eci_to_ecef(point.epoch) * point.position;
        let line_of_sight = spacecraft - station;
        let range = line_of_sight.norm();
        if range <= f64::EPSILON {
            return 90.0;
        }
        (line_of_sight.dot(&station.normalize()) / range)
            .clamp(-1.0, 1.0)
            .asin()
            .to_degrees()
    }
}

/// Greenwich mean sidereal angle (rad).
fn gmst(epoch: Epoch) -> f64 {
    let days = julian_date(epoch) - J2000_JD;
    (280.460_618_37 + 360.985_647_366_29 * days)
        .rem_euclid(360.0)
        .to_radians()
}

fn eci_to_ecef(epoch: Epoch) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::z_axis(), -gmst(epoch))
}

/// One visibility pass. Construction guarantees AOS strictly before LOS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessWindow {
    station_id: String,
    aos: Epoch,
    los: Epoch,
    max_elevation_deg: f64,
}

impl AccessWindow {
    pub fn new(
        station_id: impl Into<String>,
        aos: Epoch,
        los: Epoch,
        max_elevation_deg: f64,
    ) -> Option<Self> {
        (aos < los).then(|| Self {
            station_id: station_id.into(),
            aos,
            los,
            max_elevation_deg,
        })
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn aos(&self) -> Epoch {
        self.aos
    }

    pub fn los(&self) -> Epoch {
        self.los
    }

    pub fn max_elevation_deg(&self) -> f64 {
        self.max_elevation_deg
    }

    pub fn duration_s(&self) -> f64 {
        seconds_between(self.aos, self.los)
    }

    pub fn overlaps(&self, start: Epoch, end: Epoch) -> bool {
        start < self.los && end > self.aos
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationAccess {
    pub station_id: String,
    /// Ordered by AOS.
    pub windows: Vec<AccessWindow>,
}

pub trait AccessWindowService {
    fn compute_windows(
        &self,
        ephemeris: &[EphemerisPoint],
        stations: &[GroundStation],
    ) -> Vec<StationAccess>;
}

/// Elevation-mask scan over the ephemeris samples, with mask crossings interpolated
/// linearly between samples.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeometricAccessService;

impl GeometricAccessService {
    fn station_windows(ephemeris: &[EphemerisPoint], station: &GroundStation) -> Vec<AccessWindow> {
        let mask = station.min_elevation_deg;
        let mut windows = Vec::new();
        let mut open: Option<(Epoch, f64)> = None;
        let mut previous: Option<(&EphemerisPoint, f64)> = None;

        for point in ephemeris {
            let elevation = station.elevation_deg(point);
            let visible = elevation >= mask;

            if visible {
                open = match open {
                    Some((aos, peak)) => Some((aos, peak.max(elevation))),
                    None => {
                        let aos = previous.map_or(point.epoch, |(prev, prev_el)| {
                            crossing(prev.epoch, prev_el, point.epoch, elevation, mask)
                        });
                        Some((aos, elevation))
                    }
                };
            } else if let Some((aos, peak)) = open.take() {
                let los = previous.map_or(point.epoch, |(prev, prev_el)| {
                    crossing(prev.epoch, prev_el, point.epoch, elevation, mask)
                });
                windows.extend(AccessWindow::new(station.id.clone(), aos, los, peak));
            }
            previous = Some((point, elevation));
        }

        if let (Some((aos, peak)), Some((last, _))) = (open, previous) {
            windows.extend(AccessWindow::new(station.id.clone(), aos, last.epoch, peak));
        }
        windows
    }
}

/// Epoch at which elevation crosses `mask` between two samples.
fn crossing(t0: Epoch, e0: f64, t1: Epoch, e1: f64, mask: f64) -> Epoch {
    let span = seconds_between(t0, t1);
    if (e1 - e0).abs() <= f64::EPSILON {
        return t1;
    }
    let fraction = ((mask - e0) / (e1 - e0)).clamp(0.0, 1.0);
    offset_epoch(t0, span * fraction)
}

impl AccessWindowService for GeometricAccessService {
    fn compute_windows(
        &self,
        ephemeris: &[EphemerisPoint],
        stations: &[GroundStation],
    ) -> Vec<StationAccess> {
        stations
            .iter()
            .map(|station| StationAccess {
                station_id: station.id.clone(),
                windows: Self::station_windows(ephemeris, station),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::MU_EARTH;
    use chrono::{TimeZone, Utc};

    fn equatorial_orbit(hours: f64, step_s: f64) -> Vec<EphemerisPoint> {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let r = R_EARTH_KM + 500.0;
        let n = (MU_EARTH / r.powi(3)).sqrt();
        let count = (hours * 3600.0 / step_s) as usize;
        (0..=count)
            .map(|i| {
                let t = i as f64 * step_s;
                let (s, c) = (n * t).sin_cos();
                EphemerisPoint::new(
                    offset_epoch(t0, t),
                    Vector3::new(r * c, r * s, 0.0),
                    Vector3::new(-r * n * s, r * n * c, 0.0),
                )
            })
            .collect()
    }

    #[test]
    fn test_overhead_elevation() {
        let station = GroundStation::new("eq", 0.0, 0.0);
        let epoch = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let overhead = eci_to_ecef(epoch).inverse() * Vector3::new(R_EARTH_KM + 500.0, 0.0, 0.0);
        let point = EphemerisPoint::new(epoch, overhead, Vector3::zeros());
        assert!((station.elevation_deg(&point) - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_equatorial_station_sees_equatorial_orbit() {
        let ephemeris = equatorial_orbit(12.0, 20.0);
        let stations = vec![GroundStation::new("eq", 0.0, 30.0), GroundStation::new("pole", 89.0, 0.0)];
        let access = GeometricAccessService.compute_windows(&ephemeris, &stations);

        assert_eq!(access.len(), 2);
        assert!(!access[0].windows.is_empty());
        assert!(access[1].windows.is_empty());
        for window in &access[0].windows {
            assert!(window.aos() < window.los());
            assert!(window.max_elevation_deg() >= 10.0);
            assert!(window.duration_s() < 900.0);
        }
        assert!(access[0].windows.windows(2).all(|w| w[0].los() < w[1].aos()));
    }

    #[test]
    fn test_window_requires_aos_before_los() {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert!(AccessWindow::new("gs", t, t, 45.0).is_none());
        assert!(AccessWindow::new("gs", offset_epoch(t, 10.0), t, 45.0).is_none());
        let window = AccessWindow::new("gs", t, offset_epoch(t, 300.0), 45.0).unwrap();
        assert!(window.overlaps(offset_epoch(t, 200.0), offset_epoch(t, 400.0)));
        assert!(!window.overlaps(offset_epoch(t, 300.0), offset_epoch(t, 400.0)));
    }
}
