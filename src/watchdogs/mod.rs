//! Safeguards that sample system state every 10-15 seconds and raise
//! incidents independently of the subsystems they watch.

pub mod htm_readiness;
pub mod layer2_watchdog;
pub mod scheduler_guards;
pub mod trigger_storm;
