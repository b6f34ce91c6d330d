pub mod alerts;
pub mod cache;
pub mod config;
pub mod error;
pub mod generator;
pub mod http;
pub mod mqtt;
pub mod pipeline;
pub mod read_service;
pub mod reading;
pub mod startup;
pub mod store;
pub mod thresholds;

#[cfg(test)]
pub mod test_support;
