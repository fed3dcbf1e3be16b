pub mod calendar;
pub mod config;
pub mod error;
pub mod generator;
pub mod images;
pub mod markup;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod publisher;
pub mod retry;
