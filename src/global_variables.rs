// Dispatch queue
pub const REQUEST_QUEUE_DEPTH: usize = 256;

// Clocks
pub const MIN_CLOCK_RATE: f64 = 0.05;
pub const MAX_DELAY_UNITS: f64 = 1_000.0;

// Experiment output
pub const EXPERIMENT_RESULTS_CSV: &str = "experiment_results.csv";
