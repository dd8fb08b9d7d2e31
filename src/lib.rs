pub mod calibration;
pub mod config;
pub mod joints;
pub mod mapping;
pub mod messages;
pub mod motor;
pub mod runtime;
