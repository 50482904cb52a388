use super::{
    propellant_for_delta_v, seconds_between, select_arc, EphemerisPoint, Epoch, ManeuverResult,
    OrbitState, Propagator, J2_EARTH, MU_EARTH, OMEGA_EARTH, R_EARTH_KM,
};
use crate::error::PropagationError;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Drag is ignored above this altitude (km).
const DRAG_CEILING_KM: f64 = 1000.0;

/// Piecewise exponential atmosphere: (base altitude km, base density kg/m^3, scale height km).
const ATMOSPHERE_TABLE: [(f64, f64, f64); 12] = [
    (100.0, 5.297e-7, 5.877),
    (150.0, 2.070e-9, 22.523),
    (200.0, 2.789e-10, 37.105),
    (250.0, 7.248e-11, 45.546),
    (300.0, 2.418e-11, 53.628),
    (350.0, 9.518e-12, 53.298),
    (400.0, 3.725e-12, 58.515),
    (450.0, 1.585e-12, 60.828),
    (500.0, 6.967e-13, 63.822),
    (600.0, 1.454e-13, 71.835),
    (700.0, 3.614e-14, 88.667),
    (800.0, 1.170e-14, 124.64),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForceModel {
    pub j2: bool,
    pub drag: bool,
    /// m / (Cd * A) in kg/m^2
    pub ballistic_coefficient_kg_m2: f64,
}

impl ForceModel {
    pub fn two_body() -> Self {
        Self {
            j2: false,
            drag: false,
            ballistic_coefficient_kg_m2: 50.0,
        }
    }

    pub fn j2_only() -> Self {
        Self {
            j2: true,
            ..Self::two_body()
        }
    }

    pub fn with_drag(ballistic_coefficient_kg_m2: f64) -> Self {
        Self {
            j2: true,
            drag: true,
            ballistic_coefficient_kg_m2,
        }
    }

    /// Total acceleration (km/s^2).
    pub fn acceleration(&self, position: &Vector3<f64>, velocity: &Vector3<f64>) -> Vector3<f64> {
        let r = position.norm();
        let r3 = r * r * r;
        let mut acc = -MU_EARTH / r3 * position;

        if self.j2 {
            let z2_r2 = (position.z / r).powi(2);
            let factor = -1.5 * J2_EARTH * MU_EARTH * R_EARTH_KM.powi(2) / r.powi(5);
            acc += factor
                * Vector3::new(
                    position.x * (1.0 - 5.0 * z2_r2),
                    position.y * (1.0 - 5.0 * z2_r2),
                    position.z * (3.0 - 5.0 * z2_r2),
                );
        }

        if self.drag {
            let altitude = r - R_EARTH_KM;
            if altitude > 0.0 && altitude < DRAG_CEILING_KM {
                // Velocity relative to the co-rotating atmosphere
                let omega = Vector3::new(0.0, 0.0, OMEGA_EARTH);
                let v_rel = velocity - omega.cross(position);
                let v_rel_mag = v_rel.norm();
                if v_rel_mag > 1e-10 {
                    let rho = atmospheric_density(altitude);
                    let v_m_s = v_rel_mag * 1000.0;
                    let drag_m_s2 = 0.5 * rho * v_m_s * v_m_s / self.ballistic_coefficient_kg_m2;
                    acc -= (drag_m_s2 / 1000.0) * (v_rel / v_rel_mag);
                }
            }
        }

        acc
    }
}

fn atmospheric_density(altitude_km: f64) -> f64 {
    if altitude_km >= DRAG_CEILING_KM {
        return 0.0;
    }
    let (base, rho0, scale) = ATMOSPHERE_TABLE
        .iter()
        .rev()
        .find(|(h, _, _)| *h <= altitude_km)
        .copied()
        .unwrap_or(ATMOSPHERE_TABLE[0]);
    rho0 * (-(altitude_km - base) / scale).exp()
}

type State6 = [f64; 6];

fn pack(position: &Vector3<f64>, velocity: &Vector3<f64>) -> State6 {
    [position.x, position.y, position.z, velocity.x, velocity.y, velocity.z]
}

fn unpack(y: &State6) -> (Vector3<f64>, Vector3<f64>) {
    (Vector3::new(y[0], y[1], y[2]), Vector3::new(y[3], y[4], y[5]))
}

/// Maneuver-free stretch of trajectory with a cached integration node.
#[derive(Debug, Clone)]
struct IntegrationArc {
    anchor: EphemerisPoint,
    state: State6,
    /// Last forward grid node reached: (node index, state at `index * step`).
    cache: Option<(u64, State6)>,
}

/// Fixed-step RK4 propagator.
///
/// Steps are laid on a grid anchored at each arc epoch; only grid nodes are cached, so a
/// given epoch always integrates through the same sequence of steps.
#[derive(Debug)]
pub struct NumericalPropagator {
    force_model: ForceModel,
    step_s: f64,
    isp_s: f64,
    mass_kg: f64,
    arcs: Vec<IntegrationArc>,
}

impl NumericalPropagator {
    pub fn new(force_model: ForceModel, step_s: f64, isp_s: f64) -> Self {
        Self {
            force_model,
            step_s,
            isp_s,
            mass_kg: 0.0,
            arcs: Vec::new(),
        }
    }

    pub fn force_model(&self) -> &ForceModel {
        &self.force_model
    }

    fn derivative(&self, y: &State6) -> State6 {
        let (r, v) = unpack(y);
        let a = self.force_model.acceleration(&r, &v);
        [v.x, v.y, v.z, a.x, a.y, a.z]
    }

    fn rk4_step(&self, y: &State6, h: f64) -> State6 {
        let k1 = self.derivative(y);
        let k2 = self.derivative(&axpy(y, &k1, h / 2.0));
        let k3 = self.derivative(&axpy(y, &k2, h / 2.0));
        let k4 = self.derivative(&axpy(y, &k3, h));

        let mut out = *y;
        for (i, component) in out.iter_mut().enumerate() {
            *component += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
        }
        out
    }

    fn integrate_forward(&mut self, arc_index: usize, dt: f64) -> State6 {
        let h = self.step_s;
        let node = (dt / h).floor() as u64;

        let (mut index, mut y) = match self.arcs[arc_index].cache {
            Some((cached, state)) if cached <= node => (cached, state),
            _ => (0, self.arcs[arc_index].state),
        };
        while index < node {
            y = self.rk4_step(&y, h);
            index += 1;
        }
        self.arcs[arc_index].cache = Some((node, y));

        let remainder = dt - node as f64 * h;
        if remainder > 1e-9 {
            y = self.rk4_step(&y, remainder);
        }
        y
    }

    fn integrate_backward(&self, arc_index: usize, dt: f64) -> State6 {
        let h = self.step_s;
        let span = -dt;
        let nodes = (span / h).floor() as u64;

        let mut y = self.arcs[arc_index].state;
        for _ in 0..nodes {
            y = self.rk4_step(&y, -h);
        }
        let remainder = span - nodes as f64 * h;
        if remainder > 1e-9 {
            y = self.rk4_step(&y, -remainder);
        }
        y
    }
}

fn axpy(y: &State6, k: &State6, scale: f64) -> State6 {
    let mut out = *y;
    for (component, slope) in out.iter_mut().zip(k) {
        *component += scale * slope;
    }
    out
}

impl Propagator for NumericalPropagator {
    fn name(&self) -> &'static str {
        if self.force_model.drag {
            "numerical-rk4-j2-drag"
        } else {
            "numerical-rk4-j2"
        }
    }

    fn initialize(&mut self, state: &OrbitState) -> Result<(), PropagationError> {
        state.validate()?;
        self.arcs = vec![IntegrationArc {
            anchor: EphemerisPoint::new(state.epoch, state.position, state.velocity),
            state: pack(&state.position, &state.velocity),
            cache: None,
        }];
        self.mass_kg = state.mass_kg;
        debug!(step_s = self.step_s, drag = self.force_model.drag, "Numerical propagator initialized");
        Ok(())
    }

    fn propagate(&mut self, epoch: Epoch) -> Result<EphemerisPoint, PropagationError> {
        if self.arcs.is_empty() {
            return Err(PropagationError::NotInitialized);
        }
        let arc_index = select_arc(&self.arcs, epoch, |a| a.anchor.epoch);
        let anchor_epoch = self.arcs[arc_index].anchor.epoch;
        if epoch == anchor_epoch {
            return Ok(self.arcs[arc_index].anchor.clone());
        }

        let dt = seconds_between(anchor_epoch, epoch);
        let y = if dt > 0.0 {
            self.integrate_forward(arc_index, dt)
        } else {
            self.integrate_backward(arc_index, dt)
        };

        let (position, velocity) = unpack(&y);
        if !position.iter().chain(velocity.iter()).all(|c| c.is_finite()) {
            return Err(PropagationError::InvalidState(format!(
                "integration diverged at {epoch}"
            )));
        }
        Ok(EphemerisPoint::new(epoch, position, velocity))
    }

    fn apply_maneuver(
        &mut self,
        delta_v_km_s: Vector3<f64>,
        epoch: Epoch,
    ) -> Result<ManeuverResult, PropagationError> {
        let pre = self.propagate(epoch)?;
        let velocity = pre.velocity + delta_v_km_s;

        let mass_before_kg = self.mass_kg;
        let propellant_used_kg = propellant_for_delta_v(mass_before_kg, delta_v_km_s.norm(), self.isp_s);
        self.mass_kg -= propellant_used_kg;

        let anchor = EphemerisPoint::new(epoch, pre.position, velocity);
        self.arcs.retain(|a| a.anchor.epoch < epoch);
        self.arcs.push(IntegrationArc {
            state: pack(&anchor.position, &anchor.velocity),
            anchor: anchor.clone(),
            cache: None,
        });

        Ok(ManeuverResult {
            epoch,
            delta_v_km_s,
            propellant_used_kg,
            mass_before_kg,
            mass_after_kg: self.mass_kg,
            post_maneuver: anchor,
        })
    }

    fn mass_kg(&self) -> f64 {
        self.mass_kg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::offset_epoch;
    use chrono::{TimeZone, Utc};

    fn leo_state() -> OrbitState {
        let r = R_EARTH_KM + 500.0;
        OrbitState {
            epoch: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            position: Vector3::new(r, 0.0, 0.0),
            velocity: Vector3::new(0.0, (MU_EARTH / r).sqrt(), 0.0),
            mass_kg: 150.0,
        }
    }

    #[test]
    fn test_two_body_conserves_energy() {
        let state = leo_state();
        let mut prop = NumericalPropagator::new(ForceModel::two_body(), 10.0, 1600.0);
        prop.initialize(&state).unwrap();

        let start = prop.propagate(state.epoch).unwrap();
        let end = prop.propagate(offset_epoch(state.epoch, 5677.0)).unwrap();

        assert!((start.specific_energy() - end.specific_energy()).abs() < 1e-8);
        assert!((end.altitude_km - 500.0).abs() < 0.01);
    }

    #[test]
    fn test_call_order_does_not_change_result() {
        let state = leo_state();
        let target = offset_epoch(state.epoch, 1234.5);

        let mut direct = NumericalPropagator::new(ForceModel::j2_only(), 10.0, 1600.0);
        direct.initialize(&state).unwrap();
        let direct_point = direct.propagate(target).unwrap();

        let mut stepped = NumericalPropagator::new(ForceModel::j2_only(), 10.0, 1600.0);
        stepped.initialize(&state).unwrap();
        stepped.propagate(offset_epoch(state.epoch, 2000.0)).unwrap();
        stepped.propagate(offset_epoch(state.epoch, 333.3)).unwrap();
        let stepped_point = stepped.propagate(target).unwrap();

        assert_eq!(direct_point, stepped_point);
    }

    #[test]
    fn test_drag_lowers_orbit() {
        let state = leo_state();
        let end = offset_epoch(state.epoch, 6.0 * 3600.0);

        let mut vacuum = NumericalPropagator::new(ForceModel::j2_only(), 10.0, 1600.0);
        vacuum.initialize(&state).unwrap();
        let mut drag = NumericalPropagator::new(ForceModel::with_drag(20.0), 10.0, 1600.0);
        drag.initialize(&state).unwrap();

        let e_vacuum = vacuum.propagate(end).unwrap().specific_energy();
        let e_drag = drag.propagate(end).unwrap().specific_energy();
        assert!(e_drag < e_vacuum);
    }

    #[test]
    fn test_backward_propagation() {
        let state = leo_state();
        let mut prop = NumericalPropagator::new(ForceModel::two_body(), 10.0, 1600.0);
        prop.initialize(&state).unwrap();
        let earlier = prop.propagate(offset_epoch(state.epoch, -600.0)).unwrap();
        assert!((earlier.altitude_km - 500.0).abs() < 0.01);
        assert!(earlier.position.y < 0.0);
    }
}
