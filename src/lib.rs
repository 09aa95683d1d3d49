pub mod checkpoint;
pub mod common;
pub mod config;
pub mod convert;
pub mod model;
pub mod objective;
pub mod params;
