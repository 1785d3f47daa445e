// sampling.rs
use crate::config::SimulationConfig;
use crate::global_variables::MIN_CLOCK_RATE;
use rand::Rng;
use rand_distr::{Distribution, Exp1, Poisson, StandardNormal};
use serde::{Deserialize, Serialize};

/// Distribution car speeds are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpeedDistribution {
    /// Rate 1.
    Exponential,
    /// Mean 0, standard deviation 1.
    Normal,
    /// Lambda 1.
    Poisson,
    /// Always `carClock`.
    Constant,
    /// Uniform on `[0, carSpeedUniformEndRange]`.
    Uniform,
}

impl SpeedDistribution {
    pub const ALL: [SpeedDistribution; 5] = [
        SpeedDistribution::Exponential,
        SpeedDistribution::Normal,
        SpeedDistribution::Poisson,
        SpeedDistribution::Constant,
        SpeedDistribution::Uniform,
    ];
}

/// A drawn value together with the density of its distribution at that value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub density: f64,
}

/// Speed distribution with its parameters resolved from the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedModel {
    pub kind: SpeedDistribution,
    pub constant: f64,
    pub uniform_end: f64,
}

impl SpeedModel {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            kind: config.car_distribution_type,
            constant: config.car_clock,
            uniform_end: config.car_speed_uniform_end_range,
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Sample {
        match self.kind {
            SpeedDistribution::Constant => Sample {
                value: self.constant,
                density: 1.0,
            },
            SpeedDistribution::Normal => {
                let value: f64 = rng.sample(StandardNormal);
                Sample {
                    value,
                    density: normal_density(value),
                }
            }
            SpeedDistribution::Exponential => {
                let value: f64 = rng.sample(Exp1);
                Sample {
                    value,
                    density: exponential_density(1.0, value),
                }
            }
            SpeedDistribution::Poisson => {
                let value = poisson_draw(1.0, rng);
                Sample {
                    value,
                    density: poisson_density(1.0, value),
                }
            }
            SpeedDistribution::Uniform => {
                // A zero-width range would make every density infinite.
                let end = if self.uniform_end == 0.0 {
                    1.0
                } else {
                    self.uniform_end
                };
                Sample {
                    value: rng.random::<f64>() * end,
                    density: 1.0 / end,
                }
            }
        }
    }
}

/// Rate actually fed to an exponential clock.
///
/// Speeds drawn from the normal distribution can be zero or negative; their magnitude is
/// used and anything below `MIN_CLOCK_RATE` is raised to it, so every clock fires eventually.
pub fn clock_rate(rate: f64) -> f64 {
    let rate = rate.abs();
    if !rate.is_finite() || rate < MIN_CLOCK_RATE {
        MIN_CLOCK_RATE
    } else {
        rate
    }
}

/// Exponential inter-arrival time, in sampled time units.
pub fn exponential_delay<R: Rng>(rate: f64, rng: &mut R) -> f64 {
    let unit: f64 = rng.sample(Exp1);
    unit / clock_rate(rate)
}

/// A uniform draw on `[0, 1)`.
pub fn uniform_unit<R: Rng>(rng: &mut R) -> f64 {
    rng.random::<f64>()
}

/// Draws `k ~ Poisson(1)` and reports whether its mass falls below `cutoff`.
///
/// This is the accident and distraction trigger. The mass of Poisson(1) never exceeds
/// e^-1, so a cutoff of 1 always fires and a cutoff of 0 never does.
pub fn poisson_density_trigger<R: Rng>(cutoff: f64, rng: &mut R) -> bool {
    let k = poisson_draw(1.0, rng);
    poisson_density(1.0, k) < cutoff
}

fn poisson_draw<R: Rng>(lambda: f64, rng: &mut R) -> f64 {
    match Poisson::new(lambda) {
        Ok(poisson) => poisson.sample(rng),
        Err(_) => 0.0,
    }
}

pub fn exponential_density(rate: f64, x: f64) -> f64 {
    if x < 0.0 {
        0.0
    } else {
        rate * (-rate * x).exp()
    }
}

pub fn normal_density(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Probability mass of Poisson(lambda) at `k`. Zero for negative or fractional `k`.
pub fn poisson_density(lambda: f64, k: f64) -> f64 {
    if k < 0.0 || k.fract() != 0.0 {
        return 0.0;
    }
    let ln_factorial: f64 = (2..=k as u64).map(|i| (i as f64).ln()).sum();
    (k * lambda.ln() - lambda - ln_factorial).exp()
}
