pub mod access_events;
pub mod concerns;
pub mod edges;
pub mod hosts;
pub mod keys;
pub mod migrations;
pub mod scan_jobs;
pub mod watchers;

#[cfg(test)]
mod integration_tests;
