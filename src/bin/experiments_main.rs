// experiments_main.rs
//
// Parameter sweeps over the multi-lane simulation. One CSV row per run.
// Usage: experiments_main [clock unit ms] [output csv]
use grid_traffic::global_variables::EXPERIMENT_RESULTS_CSV;
use grid_traffic::monitoring::experiment_log::{log_experiment, ExperimentRecord};
use grid_traffic::simulation_engine::sampling::SpeedDistribution;
use grid_traffic::{start, SimulationConfig};
use log::{error, info};

const PROBS: [f64; 11] = [0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];
const QUARTERS: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];

struct Sweep {
    output: String,
    clock_unit_ms: u64,
}

impl Sweep {
    fn base(&self) -> SimulationConfig {
        SimulationConfig {
            num_horizontal_cars: 10,
            num_vertical_cars: 10,
            num_horizontal_lanes: 1,
            num_vertical_lanes: 1,
            car_movement_p: 1.0,
            accident_prob: 0.0,
            accident_scaling: false,
            clock_unit_ms: self.clock_unit_ms,
            ..Default::default()
        }
    }

    async fn run(&self, experiment: &str, config: SimulationConfig) {
        let handle = match start(config.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                error!("{experiment}: {e}");
                return;
            }
        };
        match handle.wait().await {
            Ok(report) => {
                info!(
                    "{experiment}: {} accidents in {:?}",
                    report.accidents, report.elapsed
                );
                log_experiment(
                    &self.output,
                    &ExperimentRecord::new(experiment, &config, &report),
                );
            }
            Err(e) => error!("{experiment}: {e}"),
        }
    }

    async fn distribution_by_accident_prob(&self) {
        let mut config = self.base();
        config.re_sample_speed_every_clk = true;
        for prob in QUARTERS {
            config.accident_prob = prob;
            for distribution in SpeedDistribution::ALL {
                config.car_distribution_type = distribution;
                self.run("speed_distribution", config.clone()).await;
            }
        }
    }

    async fn accident_prob(&self) {
        let mut config = self.base();
        config.re_sample_speed_every_clk = true;
        for prob in PROBS {
            config.accident_prob = prob;
            self.run("accident_prob", config.clone()).await;
        }
    }

    async fn intersection_prob(&self) {
        let mut config = self.base();
        for scaling in [false, true] {
            config.accident_scaling = scaling;
            for car_clock in [0.0, 0.5, 1.0, 2.0, 5.0] {
                config.car_clock = car_clock;
                for prob in PROBS {
                    config.intersection_accident_prob = Some(prob);
                    self.run("intersection_accident_prob", config.clone()).await;
                }
            }
        }
    }

    async fn lane_switching(&self) {
        let mut config = self.base();
        // Room for ten lanes each way.
        config.size_of_lane = 12;
        for prob in QUARTERS {
            config.prob_switching_lanes = prob;
            for lanes in [1, 2, 5, 10] {
                config.num_horizontal_lanes = lanes;
                config.num_vertical_lanes = lanes;
                self.run("lane_switching", config.clone()).await;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let clock_unit_ms = args.next().and_then(|arg| arg.parse().ok()).unwrap_or(1);
    let output = args
        .next()
        .unwrap_or_else(|| EXPERIMENT_RESULTS_CSV.to_string());
    let sweep = Sweep {
        output,
        clock_unit_ms,
    };

    info!("started experiments, writing {}", sweep.output);
    sweep.distribution_by_accident_prob().await;
    sweep.accident_prob().await;
    sweep.intersection_prob().await;
    sweep.lane_switching().await;
    info!("completed experiments");
}
