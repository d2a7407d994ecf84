pub mod aggregator;
pub mod availability;
pub mod config;
pub mod correlation;
pub mod database;
pub mod judge;
pub mod locks;
pub mod manager;
pub mod queue;
pub mod routes;
pub mod sandbox;
pub mod store;
pub mod submission;
pub mod testcases;
pub mod web_server;
pub mod worker;

pub fn create_timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
