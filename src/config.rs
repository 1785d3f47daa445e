// config.rs
use crate::error::{ConfigurationError, SimulationResult};
use crate::simulation_engine::lane_selection::LaneChoice;
use crate::simulation_engine::sampling::SpeedDistribution;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Every tunable of a run. Read-only once the simulation has started.
///
/// Keys are camelCase in JSON so configurations written for the browser front end
/// load unchanged. Missing keys fall back to [`SimulationConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationConfig {
    /// Width and height of the square grid.
    pub size_of_lane: usize,
    pub num_horizontal_lanes: usize,
    pub num_vertical_lanes: usize,

    /// Exponential rate of the in-flow clocks.
    pub in_alpha: f64,
    /// Exponential rate of the out-flow clocks.
    pub out_beta: f64,
    /// Probability that a car acts when its movement clock fires.
    pub car_movement_p: f64,

    pub num_horizontal_cars: usize,
    pub num_vertical_cars: usize,

    pub in_lane_choice: LaneChoice,
    pub out_lane_choice: LaneChoice,

    pub prob_switching_lanes: f64,
    pub lane_switch_choice: LaneChoice,

    // Accidents
    pub accident_prob: f64,
    /// Rate of the exponential clock that clears an accident.
    pub car_removal_rate: f64,
    /// Probability that cleared cars drive on instead of being towed.
    pub car_restart_prob: f64,
    /// Cutoff used at intersections. Falls back to `accident_prob` when unset.
    pub intersection_accident_prob: Option<f64>,
    /// Repeat the accident check once per occupied neighbour of the destination.
    pub accident_scaling: bool,
    pub pedestrian_death_accident_prob: f64,

    // Speeds
    /// Speed handed out by the constant distribution.
    pub car_clock: f64,
    pub car_speed_uniform_end_range: f64,
    pub car_distribution_type: SpeedDistribution,
    pub re_sample_speed_every_clk: bool,

    // Police
    pub prob_police_pull_over_prob: f64,
    pub speed_based_pull_over: bool,

    // Parking
    pub parking_enabled: bool,
    pub distraction_rate: f64,
    pub parking_time_rate: f64,
    /// Parked cars needed before a crosswalk opens next to the parking cell.
    pub cross_walk_cutoff: usize,

    // Crosswalks and slow-downs
    pub cross_walk_enabled: bool,
    pub cross_walk_slow_down_rate: f64,
    pub slow_down_speed: f64,

    pub prob_entering_intersection: f64,

    /// Seed for the root random source. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Wall-clock milliseconds per sampled unit of time.
    pub clock_unit_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            size_of_lane: 10,
            num_horizontal_lanes: 1,
            num_vertical_lanes: 1,
            in_alpha: 1.0,
            out_beta: 1.0,
            car_movement_p: 0.5,
            num_horizontal_cars: 10,
            num_vertical_cars: 10,
            in_lane_choice: LaneChoice::Uniform,
            out_lane_choice: LaneChoice::Uniform,
            prob_switching_lanes: 0.0,
            lane_switch_choice: LaneChoice::Uniform,
            accident_prob: 0.0,
            car_removal_rate: 1.0,
            car_restart_prob: 0.5,
            intersection_accident_prob: None,
            accident_scaling: false,
            pedestrian_death_accident_prob: 0.0,
            car_clock: 1.0,
            car_speed_uniform_end_range: 1.0,
            car_distribution_type: SpeedDistribution::Constant,
            re_sample_speed_every_clk: false,
            prob_police_pull_over_prob: 0.0,
            speed_based_pull_over: false,
            parking_enabled: false,
            distraction_rate: 0.0,
            parking_time_rate: 1.0,
            cross_walk_cutoff: 2,
            cross_walk_enabled: true,
            cross_walk_slow_down_rate: 1.0,
            slow_down_speed: 0.5,
            prob_entering_intersection: 1.0,
            seed: None,
            clock_unit_ms: 100,
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> SimulationResult<Self> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> SimulationResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks grid geometry first, then every probability and rate.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let size = self.size_of_lane;
        if size < 3 {
            return Err(ConfigurationError::GridTooSmall(size));
        }
        if self.num_horizontal_lanes >= size {
            return Err(ConfigurationError::TooManyHorizontalLanes {
                lanes: self.num_horizontal_lanes,
                size,
            });
        }
        if self.num_vertical_lanes >= size {
            return Err(ConfigurationError::TooManyVerticalLanes {
                lanes: self.num_vertical_lanes,
                size,
            });
        }

        let mut probabilities = vec![
            ("carMovementP", self.car_movement_p),
            ("probSwitchingLanes", self.prob_switching_lanes),
            ("accidentProb", self.accident_prob),
            ("carRestartProb", self.car_restart_prob),
            ("pedestrianDeathAccidentProb", self.pedestrian_death_accident_prob),
            ("probPolicePullOverProb", self.prob_police_pull_over_prob),
            ("distractionRate", self.distraction_rate),
            ("probEnteringIntersection", self.prob_entering_intersection),
        ];
        if let Some(p) = self.intersection_accident_prob {
            probabilities.push(("intersectionAccidentProb", p));
        }
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::InvalidProbability { name, value });
            }
        }

        let rates = [
            ("inAlpha", self.in_alpha),
            ("outBeta", self.out_beta),
            ("carRemovalRate", self.car_removal_rate),
            ("parkingTimeRate", self.parking_time_rate),
            ("crossWalkSlowDownRate", self.cross_walk_slow_down_rate),
            ("slowDownSpeed", self.slow_down_speed),
            ("carSpeedUniformEndRange", self.car_speed_uniform_end_range),
        ];
        for (name, value) in rates {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::InvalidRate { name, value });
            }
        }
        if !self.car_clock.is_finite() {
            return Err(ConfigurationError::InvalidRate {
                name: "carClock",
                value: self.car_clock,
            });
        }

        if self.clock_unit_ms == 0 {
            return Err(ConfigurationError::ZeroClockUnit);
        }
        Ok(())
    }

    /// Accident cutoff for a destination that is an intersection.
    pub fn intersection_accident_cutoff(&self) -> f64 {
        self.intersection_accident_prob.unwrap_or(self.accident_prob)
    }

    pub fn clock_unit(&self) -> Duration {
        Duration::from_millis(self.clock_unit_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(SimulationConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_tiny_grid() {
        let config = SimulationConfig {
            size_of_lane: 2,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigurationError::GridTooSmall(2)));
    }

    #[test]
    fn rejects_lanes_filling_the_grid() {
        let config = SimulationConfig {
            size_of_lane: 5,
            num_horizontal_lanes: 5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::TooManyHorizontalLanes { lanes: 5, size: 5 })
        ));

        let config = SimulationConfig {
            size_of_lane: 5,
            num_vertical_lanes: 7,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::TooManyVerticalLanes { lanes: 7, size: 5 })
        ));
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let config = SimulationConfig {
            accident_prob: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidProbability { name: "accidentProb", .. })
        ));
    }

    #[test]
    fn rejects_negative_rate() {
        let config = SimulationConfig {
            out_beta: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidRate { name: "outBeta", .. })
        ));
    }

    #[test]
    fn loads_camel_case_json_with_defaults() {
        let config = SimulationConfig::from_json_str(
            r#"{"sizeOfLane": 12, "numHorizontalLanes": 2, "inLaneChoice": "trafficBased",
                "carDistributionType": "normal", "seed": 7}"#,
        )
        .unwrap();
        assert_eq!(config.size_of_lane, 12);
        assert_eq!(config.num_horizontal_lanes, 2);
        assert_eq!(config.in_lane_choice, LaneChoice::TrafficBased);
        assert_eq!(config.car_distribution_type, SpeedDistribution::Normal);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.num_vertical_lanes, 1);
        assert_eq!(config.clock_unit_ms, 100);
    }

    #[test]
    fn json_loading_validates() {
        let err = SimulationConfig::from_json_str(r#"{"sizeOfLane": 1}"#).unwrap_err();
        assert!(matches!(
            err,
            crate::error::SimulationError::Configuration(ConfigurationError::GridTooSmall(1))
        ));
    }

    #[test]
    fn intersection_cutoff_falls_back_to_accident_prob() {
        let mut config = SimulationConfig {
            accident_prob: 0.3,
            ..Default::default()
        };
        assert_eq!(config.intersection_accident_cutoff(), 0.3);
        config.intersection_accident_prob = Some(0.8);
        assert_eq!(config.intersection_accident_cutoff(), 0.8);
    }
}
