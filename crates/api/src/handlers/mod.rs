pub mod health;
pub mod metrics;
pub mod reports;
pub mod results;
