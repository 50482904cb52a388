use super::elements::{OrbitalElements, SecularRates};
use super::{
    propellant_for_delta_v, seconds_between, select_arc, EccentricityPolicy, EphemerisPoint,
    Epoch, ManeuverResult, OrbitState, Propagator,
};
use crate::config::PropagatorConfig;
use crate::error::PropagationError;
use nalgebra::Vector3;
use tracing::{debug, warn};

/// One maneuver-free stretch of trajectory: the Cartesian anchor and the mean elements
/// derived from it.
#[derive(Debug, Clone)]
struct ElementArc {
    anchor: EphemerisPoint,
    elements: OrbitalElements,
    rates: SecularRates,
}

/// Secular J2 propagator for near-circular orbits.
///
/// True anomaly is approximated by mean anomaly, so accuracy degrades with eccentricity;
/// `max_eccentricity` with its policy marks where the approximation stops being usable.
#[derive(Debug)]
pub struct AnalyticalPropagator {
    max_eccentricity: f64,
    policy: EccentricityPolicy,
    isp_s: f64,
    mass_kg: f64,
    arcs: Vec<ElementArc>,
    notices: Vec<String>,
}

impl AnalyticalPropagator {
    pub fn new(config: &PropagatorConfig, isp_s: f64) -> Self {
        Self {
            max_eccentricity: config.max_eccentricity,
            policy: config.eccentricity_policy,
            isp_s,
            mass_kg: 0.0,
            arcs: Vec::new(),
            notices: Vec::new(),
        }
    }

    fn build_arc(
        &mut self,
        epoch: Epoch,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
    ) -> Result<ElementArc, PropagationError> {
        let elements = OrbitalElements::from_cartesian(&position, &velocity)?;

        if elements.eccentricity > self.max_eccentricity {
            let message = format!(
                "eccentricity {:.4} exceeds analytical validity limit {:.4}",
                elements.eccentricity, self.max_eccentricity
            );
            match self.policy {
                EccentricityPolicy::Reject => return Err(PropagationError::InvalidState(message)),
                EccentricityPolicy::Warn => {
                    warn!("{}", message);
                    self.notices.push(message);
                }
            }
        }

        Ok(ElementArc {
            anchor: EphemerisPoint::new(epoch, position, velocity),
            rates: elements.j2_secular_rates(),
            elements,
        })
    }
}

impl Propagator for AnalyticalPropagator {
    fn name(&self) -> &'static str {
        "analytical-j2"
    }

    fn initialize(&mut self, state: &OrbitState) -> Result<(), PropagationError> {
        state.validate()?;
        let arc = self.build_arc(state.epoch, state.position, state.velocity)?;
        debug!(
            sma_km = arc.elements.semi_major_axis_km,
            ecc = arc.elements.eccentricity,
            "Analytical propagator initialized"
        );
        self.arcs = vec![arc];
        self.mass_kg = state.mass_kg;
        Ok(())
    }

    fn propagate(&mut self, epoch: Epoch) -> Result<EphemerisPoint, PropagationError> {
        if self.arcs.is_empty() {
            return Err(PropagationError::NotInitialized);
        }
        let arc = &self.arcs[select_arc(&self.arcs, epoch, |a| a.anchor.epoch)];
        if epoch == arc.anchor.epoch {
            return Ok(arc.anchor.clone());
        }

        let dt = seconds_between(arc.anchor.epoch, epoch);
        let (position, velocity) = arc.elements.drifted(&arc.rates, dt).to_cartesian();
        Ok(EphemerisPoint::new(epoch, position, velocity))
    }

    fn apply_maneuver(
        &mut self,
        delta_v_km_s: Vector3<f64>,
        epoch: Epoch,
    ) -> Result<ManeuverResult, PropagationError> {
        let pre = self.propagate(epoch)?;
        let velocity = pre.velocity + delta_v_km_s;
        let arc = self.build_arc(epoch, pre.position, velocity)?;

        let mass_before_kg = self.mass_kg;
        let propellant_used_kg = propellant_for_delta_v(mass_before_kg, delta_v_km_s.norm(), self.isp_s);
        self.mass_kg -= propellant_used_kg;

        // A maneuver rewrites everything after it.
        self.arcs.retain(|a| a.anchor.epoch < epoch);
        let post_maneuver = arc.anchor.clone();
        self.arcs.push(arc);

        Ok(ManeuverResult {
            epoch,
            delta_v_km_s,
            propellant_used_kg,
            mass_before_kg,
            mass_after_kg: self.mass_kg,
            post_maneuver,
        })
    }

    fn mass_kg(&self) -> f64 {
        self.mass_kg
    }

    fn drain_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }
}
