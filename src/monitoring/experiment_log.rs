// monitoring/experiment_log.rs
use crate::config::SimulationConfig;
use crate::error::SimulationResult;
use crate::shared_data::{current_timestamp, Outcome, SimulationReport};
use crate::simulation_engine::sampling::SpeedDistribution;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;

/// One row of the experiment results file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub timestamp: u64,
    pub experiment: String,
    pub size_of_lane: usize,
    pub lanes: usize,
    pub distribution: SpeedDistribution,
    pub accident_prob: f64,
    pub intersection_accident_prob: f64,
    pub accident_scaling: bool,
    pub car_clock: f64,
    pub prob_switching_lanes: f64,
    pub outcome: Outcome,
    pub accidents: usize,
    pub arrived: usize,
    pub towed: usize,
    pub elapsed_ms: u64,
}

impl ExperimentRecord {
    pub fn new(experiment: &str, config: &SimulationConfig, report: &SimulationReport) -> Self {
        Self {
            timestamp: current_timestamp(),
            experiment: experiment.to_string(),
            size_of_lane: config.size_of_lane,
            lanes: config.num_horizontal_lanes,
            distribution: config.car_distribution_type,
            accident_prob: config.accident_prob,
            intersection_accident_prob: config.intersection_accident_cutoff(),
            accident_scaling: config.accident_scaling,
            car_clock: config.car_clock,
            prob_switching_lanes: config.prob_switching_lanes,
            outcome: report.outcome,
            accidents: report.accidents,
            arrived: report.arrived_horizontal + report.arrived_vertical,
            towed: report.deleted_horizontal + report.deleted_vertical,
            elapsed_ms: report.elapsed.as_millis() as u64,
        }
    }
}

/// Appends `record` to a CSV file, writing the header only when the file is new.
pub fn log_to_csv<T: Serialize>(path: impl AsRef<Path>, record: &T) -> SimulationResult<()> {
    let path = path.as_ref();
    let file_exists = path.exists();
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);
    wtr.serialize(record)?;
    wtr.flush()?;
    Ok(())
}

pub fn log_experiment(path: impl AsRef<Path>, record: &ExperimentRecord) {
    if let Err(e) = log_to_csv(path, record) {
        warn!("Error logging experiment {}: {}", record.experiment, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn report() -> SimulationReport {
        SimulationReport {
            outcome: Outcome::Completed,
            accidents: 2,
            arrived_horizontal: 9,
            arrived_vertical: 8,
            deleted_horizontal: 1,
            deleted_vertical: 2,
            still_parked: 0,
            elapsed: Duration::from_millis(1500),
        }
    }

    #[test]
    fn record_summarises_a_run() {
        let config = SimulationConfig {
            accident_prob: 0.4,
            ..Default::default()
        };
        let record = ExperimentRecord::new("accident_prob", &config, &report());
        assert_eq!(record.arrived, 17);
        assert_eq!(record.towed, 3);
        assert_eq!(record.elapsed_ms, 1500);
        assert_eq!(record.intersection_accident_prob, 0.4);
    }

    #[test]
    fn header_is_written_once() {
        let path = std::env::temp_dir().join(format!(
            "grid_traffic_experiment_log_{}.csv",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let record = ExperimentRecord::new("header", &SimulationConfig::default(), &report());
        log_to_csv(&path, &record).unwrap();
        log_to_csv(&path, &record).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,experiment"));
        assert!(lines[1].contains(",header,"));
        let _ = std::fs::remove_file(&path);
    }
}
