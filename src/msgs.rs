//! Shared topic names and record types.
//!
//! Record types published over the registry must be `Copy` so fan-out can
//! duplicate them into every subscriber queue without allocation. Each
//! record carries a millisecond timestamp taken at publish time so consumers
//! can reason about staleness.

use std::sync::OnceLock;
use std::time::Instant;

/// Measured temperature, published by the temperature service.
pub const TOPIC_TEMPERATURE: &str = "temperature";
/// Desired temperature setpoint, published by the UI or a test harness.
pub const TOPIC_PID_TARGET: &str = "pid_target";
/// Controller gains, published whenever tuning changes.
pub const TOPIC_PID_VALUES: &str = "pid_values";
/// Controller output duty, published by the PID service.
pub const TOPIC_OUTPUT_POWER: &str = "output_power";
/// Nudge for an immediate controller recomputation outside the regular cadence.
pub const TOPIC_CALC_PID: &str = "calc_pid";
/// Debounced input events, published by the input service.
pub const TOPIC_INPUT_EVENTS: &str = "input_events";

/// Milliseconds since the process-wide epoch (first call).
pub fn now_millis() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// One temperature sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature {
    pub timestamp: u64,
    pub celsius: f32,
}

/// Target value for the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidTarget {
    pub timestamp: u64,
    pub setpoint: f32,
}

/// Controller gain set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub timestamp: u64,
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

/// Controller output in percent of full power, clamped to 0..=100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputPower {
    pub timestamp: u64,
    pub percent: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_monotonic() {
        let first = now_millis();
        let second = now_millis();
        assert!(second >= first);
    }
}
