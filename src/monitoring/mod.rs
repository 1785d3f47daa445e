pub mod experiment_log;
