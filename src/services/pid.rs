//! PID control loop over the pub/sub layer.
//!
//! [`PidController`] is the pure control math; [`PidService`] wires it to
//! the registry: it multiplexes the measurement, setpoint, gains and nudge
//! topics through one [`QueueSet`] wait and publishes the computed output
//! power at a fixed cadence (or immediately on a nudge).

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::msgs::{
    now_millis, OutputPower, PidGains, PidTarget, Temperature, TOPIC_CALC_PID,
    TOPIC_OUTPUT_POWER, TOPIC_PID_TARGET, TOPIC_PID_VALUES, TOPIC_TEMPERATURE,
};
use crate::pubsub::{Publisher, Subscriber};
use crate::queue::QueueSet;
use crate::registry::Runtime;
use crate::task::{Runnable, TaskContext};

/// Textbook PID with clamped output and integral anti-windup.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f32,
    ki: f32,
    kd: f32,
    setpoint: f32,
    integral: f32,
    last_error: Option<f32>,
    output_min: f32,
    output_max: f32,
}

impl PidController {
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint: 0.0,
            integral: 0.0,
            last_error: None,
            output_min: 0.0,
            output_max: 100.0,
        }
    }

    pub fn set_target(&mut self, setpoint: f32) {
        self.setpoint = setpoint;
    }

    pub fn target(&self) -> f32 {
        self.setpoint
    }

    /// Replaces the gains and restarts the history so stale integral action
    /// from the old tuning cannot kick the output.
    pub fn set_gains(&mut self, kp: f32, ki: f32, kd: f32) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
        self.integral = 0.0;
        self.last_error = None;
    }

    /// One control step over `dt`; returns the clamped output.
    pub fn update(&mut self, input: f32, dt: Duration) -> f32 {
        let dt = dt.as_secs_f32().max(f32::EPSILON);
        let error = self.setpoint - input;

        let derivative = match self.last_error {
            Some(last) => (error - last) / dt,
            None => 0.0,
        };
        self.last_error = Some(error);

        let candidate_integral = self.integral + error * dt;
        let raw = self.kp * error + self.ki * candidate_integral + self.kd * derivative;
        let output = raw.clamp(self.output_min, self.output_max);
        // Anti-windup: only integrate while the output is not saturated
        // against the error direction.
        if raw == output || (raw > output) != (error > 0.0) {
            self.integral = candidate_integral;
        }
        output
    }
}

/// Runs a [`PidController`] against the registry's topics.
pub struct PidService {
    temperature: Subscriber<Temperature, 10>,
    target: Subscriber<PidTarget, 1>,
    gains: Subscriber<PidGains, 1>,
    nudge: Subscriber<(), 1>,
    output: Arc<Publisher<OutputPower>>,
    set: QueueSet,
    controller: PidController,
    /// Exponentially smoothed input: each new sample is averaged with the
    /// previous filtered value.
    filtered_input: Option<f32>,
    sample_interval: Duration,
    poll_interval: Duration,
    last_update: Instant,
}

impl PidService {
    pub fn new(
        runtime: &Runtime,
        controller: PidController,
        sample_interval: Duration,
    ) -> crate::Result<Self> {
        let service = Self {
            temperature: runtime.subscribe(TOPIC_TEMPERATURE)?,
            target: runtime.subscribe(TOPIC_PID_TARGET)?,
            gains: runtime.subscribe(TOPIC_PID_VALUES)?,
            nudge: runtime.subscribe(TOPIC_CALC_PID)?,
            output: runtime.advertise(TOPIC_OUTPUT_POWER)?,
            set: QueueSet::new(),
            controller,
            filtered_input: None,
            sample_interval,
            poll_interval: sample_interval.min(Duration::from_millis(100)),
            last_update: Instant::now(),
        };
        // Join the set while the fresh queues are guaranteed empty; records
        // published before the task starts then still wake the first wait.
        service.temperature.add_to_set(&service.set);
        service.target.add_to_set(&service.set);
        service.gains.add_to_set(&service.set);
        service.nudge.add_to_set(&service.set);
        Ok(service)
    }

    fn compute_and_publish(&mut self) {
        let Some(input) = self.filtered_input else {
            return;
        };
        let now = Instant::now();
        let percent = self.controller.update(input, now - self.last_update);
        self.last_update = now;
        self.output.publish(OutputPower {
            timestamp: now_millis(),
            percent,
        });
        trace!("pid: input {input:.2} -> output {percent:.1}%");
    }
}

impl Runnable for PidService {
    fn init(&mut self, _ctx: &TaskContext) {
        self.last_update = Instant::now();
    }

    fn run(&mut self, _ctx: &TaskContext) -> bool {
        let mut nudged = false;
        if let Some(member) = self.set.wait_timeout(self.poll_interval) {
            if self.temperature.can_receive(member) {
                while let Some(sample) = self.temperature.try_receive() {
                    self.filtered_input = Some(match self.filtered_input {
                        Some(previous) => (previous + sample.celsius) / 2.0,
                        None => sample.celsius,
                    });
                }
            } else if self.target.can_receive(member) {
                if let Some(target) = self.target.try_receive() {
                    debug!("pid: target {:.2}", target.setpoint);
                    self.controller.set_target(target.setpoint);
                }
            } else if self.gains.can_receive(member) {
                if let Some(gains) = self.gains.try_receive() {
                    debug!("pid: gains kp={} ki={} kd={}", gains.kp, gains.ki, gains.kd);
                    self.controller.set_gains(gains.kp, gains.ki, gains.kd);
                }
            } else if self.nudge.can_receive(member) {
                nudged = self.nudge.try_receive().is_some();
            }
        }

        if nudged || self.last_update.elapsed() >= self.sample_interval {
            self.compute_and_publish();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: Duration = Duration::from_millis(100);

    #[test]
    fn output_is_clamped() {
        let mut pid = PidController::new(50.0, 0.0, 0.0);
        pid.set_target(100.0);
        assert_eq!(pid.update(0.0, DT), 100.0);
        assert_eq!(pid.update(200.0, DT), 0.0);
    }

    #[test]
    fn proportional_response_scales_with_error() {
        let mut pid = PidController::new(2.0, 0.0, 0.0);
        pid.set_target(30.0);
        assert_eq!(pid.update(20.0, DT), 20.0);
        assert_eq!(pid.update(25.0, DT), 10.0);
        assert_eq!(pid.update(30.0, DT), 0.0);
    }

    #[test]
    fn integral_accumulates_persistent_error() {
        let mut pid = PidController::new(0.0, 1.0, 0.0);
        pid.set_target(10.0);
        let first = pid.update(9.0, Duration::from_secs(1));
        let second = pid.update(9.0, Duration::from_secs(1));
        assert!(second > first);
    }

    #[test]
    fn integral_does_not_wind_up_while_saturated() {
        let mut pid = PidController::new(0.0, 10.0, 0.0);
        pid.set_target(100.0);
        for _ in 0..50 {
            assert_eq!(pid.update(0.0, Duration::from_secs(1)), 100.0);
        }
        // Once the error collapses the output must recover promptly instead
        // of burning off decades of accumulated integral.
        let recovered = pid.update(100.0, Duration::from_secs(1));
        assert!(recovered <= 100.0);
        pid.set_target(0.0);
        let settled = pid.update(100.0, Duration::from_secs(1));
        assert!(settled < 100.0);
    }

    #[test]
    fn gain_change_resets_history() {
        let mut pid = PidController::new(1.0, 1.0, 1.0);
        pid.set_target(50.0);
        pid.update(0.0, Duration::from_secs(1));
        pid.set_gains(1.0, 0.0, 0.0);
        // Pure proportional after the reset: no integral or derivative
        // leftovers from the old tuning.
        assert_eq!(pid.update(10.0, Duration::from_secs(1)), 40.0);
    }
}
