pub mod analytics;
pub mod models;
pub mod segment;
pub mod transport;
