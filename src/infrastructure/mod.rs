//! Infrastructure layer: ambient concerns (config, logging) that every
//! subsystem depends on but that carry no orchestration logic of their
//! own.

pub mod config;
pub mod logging;
