//! Temperature acquisition service.
//!
//! Samples an analog source, oversamples to knock down ADC noise, converts
//! counts to degrees Celsius through a thermistor beta model, and publishes
//! the result on the temperature topic at a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use log::trace;

use crate::msgs::{now_millis, Temperature, TOPIC_TEMPERATURE};
use crate::pubsub::Publisher;
use crate::registry::Runtime;
use crate::task::{Runnable, TaskContext};

/// Source of raw ADC counts.
pub trait AnalogSampler: Send {
    fn sample(&mut self) -> u16;
}

impl<F> AnalogSampler for F
where
    F: FnMut() -> u16 + Send,
{
    fn sample(&mut self) -> u16 {
        self()
    }
}

/// NTC thermistor in a divider against a fixed series resistor.
///
/// Uses the beta approximation `1/T = 1/T0 + ln(r/r0)/beta`.
#[derive(Debug, Clone, Copy)]
pub struct ThermistorCurve {
    /// Beta coefficient in kelvin.
    pub beta: f32,
    /// Nominal resistance at `t0_celsius`, in ohms.
    pub r0_ohms: f32,
    /// Nominal temperature, in degrees Celsius.
    pub t0_celsius: f32,
    /// Series resistor, in ohms.
    pub series_ohms: f32,
    /// Full-scale ADC count.
    pub adc_max: u16,
}

impl ThermistorCurve {
    /// A common 10k NTC (beta 3950) against 10k, on a 12-bit converter.
    pub fn ntc_10k_3950() -> Self {
        Self {
            beta: 3950.0,
            r0_ohms: 10_000.0,
            t0_celsius: 25.0,
            series_ohms: 10_000.0,
            adc_max: 4095,
        }
    }

    /// Converts raw counts to degrees Celsius.
    ///
    /// Counts at either rail indicate an open or shorted sensor; those are
    /// reported as `None` rather than as a nonsense extreme.
    pub fn celsius_from_counts(&self, counts: u16) -> Option<f32> {
        if counts == 0 || counts >= self.adc_max {
            return None;
        }
        let counts = f32::from(counts);
        let resistance = self.series_ohms * counts / (f32::from(self.adc_max) - counts);
        let t0_kelvin = self.t0_celsius + 273.15;
        let inv_kelvin = 1.0 / t0_kelvin + (resistance / self.r0_ohms).ln() / self.beta;
        Some(1.0 / inv_kelvin - 273.15)
    }
}

/// Publishes oversampled temperature readings.
pub struct TemperatureService {
    sampler: Box<dyn AnalogSampler>,
    curve: ThermistorCurve,
    publisher: Arc<Publisher<Temperature>>,
    interval: Duration,
    oversample: u32,
}

impl TemperatureService {
    pub fn new(
        runtime: &Runtime,
        sampler: impl AnalogSampler + 'static,
        curve: ThermistorCurve,
        interval: Duration,
    ) -> crate::Result<Self> {
        Ok(Self {
            sampler: Box::new(sampler),
            curve,
            publisher: runtime.advertise(TOPIC_TEMPERATURE)?,
            interval,
            oversample: 16,
        })
    }
}

impl Runnable for TemperatureService {
    fn run(&mut self, ctx: &TaskContext) -> bool {
        let mut sum = 0u32;
        for _ in 0..self.oversample {
            sum += u32::from(self.sampler.sample());
        }
        let mean = (sum / self.oversample) as u16;

        if let Some(celsius) = self.curve.celsius_from_counts(mean) {
            trace!("temperature: {mean} counts -> {celsius:.2} C");
            self.publisher.publish(Temperature {
                timestamp: now_millis(),
                celsius,
            });
        }
        ctx.sleep(self.interval);
        true
    }
}
