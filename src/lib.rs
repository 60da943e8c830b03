pub mod config;
pub mod controller;
pub mod db;
pub mod error;
pub mod executor;
pub mod intake;
pub mod job;
pub mod model;
pub mod orchestrator;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod shutdown;
