pub mod benchmark;
pub mod benchmark_utils;
pub mod config;
pub mod dataset;
pub mod perf;
pub mod translate;
