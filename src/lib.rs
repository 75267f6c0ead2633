pub mod batch;
pub mod baseline;
pub mod comm;
pub mod common;
pub mod config;
pub mod driver;
pub mod episode;
pub mod error;
pub mod map;
pub mod oracle;
pub mod report;
pub mod scenario;
pub mod solver;
pub mod stat;
