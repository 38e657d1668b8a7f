// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated ASIC channel
//!
//! The simulator models the device under test as a linear, memoryless-plus-delay
//! amplifier:
//!
//! ```text
//! output(t) = gain * (input(t - delay) + offset) + noise
//! ```
//!
//! where `input` is whatever the generator output 0 is programmed with. When
//! the channel is powered off the output only carries noise. The generator
//! level is read back unchanged on analog input 0.
//!
//! Every call is appended to an event log shared through
//! [`SimulatedSession::event_log`], so tests can assert the exact sequence of
//! hardware operations after the session has been boxed and handed over.
//! Communication failures can be injected with
//! [`SimulatedSession::inject_failures`] to exercise reconnect logic.

use async_trait::async_trait;
use log::debug;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    Acquisition, AcquisitionRequest, AnalogOutput, DeviceLimits, HardwareError, HardwareSession,
    INPUT_CHANNEL, OUTPUT_CHANNEL,
};
use crate::config::hardware::SimulatorConfig;
use crate::spectral::Waveform;
use crate::utility::noise_generator::NoiseGenerator;

/// Number of generator outputs and oscilloscope inputs
const CHANNEL_COUNT: usize = 2;

/// One recorded hardware operation
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PowerOn,
    PowerOff,
    Generate(AnalogOutput),
    Acquire {
        channels: Vec<usize>,
        samples: usize,
        sample_rate: f64,
    },
    Reconnect,
}

pub struct SimulatedSession {
    channel: String,
    model: SimulatorConfig,
    limits: DeviceLimits,
    powered: bool,
    outputs: [Option<AnalogOutput>; CHANNEL_COUNT],
    noise: NoiseGenerator,
    events: Arc<Mutex<Vec<SessionEvent>>>,
    pending_failures: Arc<AtomicU32>,
}

impl SimulatedSession {
    pub fn new(channel: &str, model: &SimulatorConfig) -> Self {
        Self {
            channel: channel.to_string(),
            model: model.clone(),
            limits: DeviceLimits::default(),
            powered: false,
            outputs: [None; CHANNEL_COUNT],
            noise: NoiseGenerator::new(model.seed),
            events: Arc::new(Mutex::new(Vec::new())),
            pending_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Override the default device limits
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Shared handle on the event log
    pub fn event_log(&self) -> Arc<Mutex<Vec<SessionEvent>>> {
        Arc::clone(&self.events)
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Make the next `count` operations fail with a communication error
    pub fn inject_failures(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    fn record(&self, event: SessionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Consume one injected failure, if any
    fn check_link(&self, operation: &str) -> Result<(), HardwareError> {
        let consumed = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            Err(HardwareError::Communication(format!(
                "simulated link failure during {}",
                operation
            )))
        } else {
            Ok(())
        }
    }

    /// The oscilloscope only supports integer dividers of its base clock
    fn achieved_rate(&self, target: f64) -> f64 {
        let divider = (self.limits.max_sample_rate / target).round().max(1.0);
        self.limits.max_sample_rate / divider
    }

    fn stimulus_at(&self, t: f64) -> f64 {
        self.outputs[super::GENERATOR_CHANNEL]
            .map(|output| output.level_at(t))
            .unwrap_or(0.0)
    }

    fn validate(&self, request: &AcquisitionRequest) -> Result<(), HardwareError> {
        if request.samples == 0 || request.samples > self.limits.max_buffer_size {
            return Err(HardwareError::InvalidRequest(format!(
                "sample count {} outside 1..={}",
                request.samples, self.limits.max_buffer_size
            )));
        }
        if !(request.sample_rate.is_finite() && request.sample_rate > 0.0) {
            return Err(HardwareError::InvalidRequest(format!(
                "sample rate {} Hz",
                request.sample_rate
            )));
        }
        if request.channels.is_empty() {
            return Err(HardwareError::InvalidRequest(
                "no input channel selected".to_string(),
            ));
        }
        if let Some(channel) = request.channels.iter().find(|&&c| c >= CHANNEL_COUNT) {
            return Err(HardwareError::InvalidRequest(format!(
                "no analog input {}",
                channel
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl HardwareSession for SimulatedSession {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn power_on(&mut self) -> Result<(), HardwareError> {
        self.check_link("power_on")?;
        debug!(
            "{}: power on, current limit {:.1} mA",
            self.channel,
            self.limits.current_limit * 1e3
        );
        self.powered = true;
        self.record(SessionEvent::PowerOn);
        Ok(())
    }

    async fn power_off(&mut self) -> Result<(), HardwareError> {
        self.check_link("power_off")?;
        self.powered = false;
        self.record(SessionEvent::PowerOff);
        Ok(())
    }

    async fn generate(&mut self, output: AnalogOutput) -> Result<(), HardwareError> {
        self.check_link("generate")?;
        let channel = output.channel();
        if channel >= CHANNEL_COUNT {
            return Err(HardwareError::InvalidRequest(format!(
                "no generator output {}",
                channel
            )));
        }
        self.outputs[channel] = Some(output);
        self.record(SessionEvent::Generate(output));
        Ok(())
    }

    async fn acquire(
        &mut self,
        request: &AcquisitionRequest,
    ) -> Result<Acquisition, HardwareError> {
        self.check_link("acquire")?;
        self.validate(request)?;

        let rate = self.achieved_rate(request.sample_rate);
        let range = request.range.abs();
        let mut waveforms = Vec::with_capacity(request.channels.len());

        for &channel in &request.channels {
            let mut samples: Vec<f64> = (0..request.samples)
                .map(|i| {
                    let t = i as f64 / rate;
                    match channel {
                        INPUT_CHANNEL => self.stimulus_at(t),
                        OUTPUT_CHANNEL if self.powered => {
                            self.model.gain
                                * (self.stimulus_at(t - self.model.delay) + self.model.offset)
                        }
                        _ => 0.0,
                    }
                })
                .collect();

            if channel == OUTPUT_CHANNEL && self.model.noise_rms > 0.0 {
                let noise = self
                    .noise
                    .gaussian_samples(request.samples, self.model.noise_rms);
                for (s, n) in samples.iter_mut().zip(noise) {
                    *s += n;
                }
            }
            for s in samples.iter_mut() {
                *s = s.clamp(-range, range);
            }
            waveforms.push(Waveform::new(samples, rate));
        }

        debug!(
            "{}: captured {} x {} samples at {:.1} Hz",
            self.channel,
            request.channels.len(),
            request.samples,
            rate
        );
        self.record(SessionEvent::Acquire {
            channels: request.channels.clone(),
            samples: request.samples,
            sample_rate: rate,
        });
        Ok(Acquisition {
            waveforms,
            sample_rate: rate,
        })
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    async fn reconnect(&mut self) -> Result<(), HardwareError> {
        self.record(SessionEvent::Reconnect);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model(gain: f64, offset: f64) -> SimulatorConfig {
        SimulatorConfig {
            gain,
            offset,
            delay: 0.0,
            noise_rms: 0.0,
            seed: 1,
        }
    }

    fn request(channels: Vec<usize>, sample_rate: f64, samples: usize) -> AcquisitionRequest {
        AcquisitionRequest {
            channels,
            sample_rate,
            samples,
            range: 5.0,
        }
    }

    #[tokio::test]
    async fn test_dc_transfer_through_powered_channel() {
        let mut session = SimulatedSession::new("CHX", &model(2.0, 0.1));
        session.power_on().await.unwrap();
        session
            .generate(AnalogOutput::Dc {
                channel: 0,
                offset: 0.4,
            })
            .await
            .unwrap();

        let acquisition = session.acquire(&request(vec![0, 1], 1e4, 16)).await.unwrap();
        assert_eq!(acquisition.waveforms.len(), 2);
        assert_relative_eq!(acquisition.waveforms[0].mean(), 0.4, epsilon = 1e-12);
        assert_relative_eq!(acquisition.waveforms[1].mean(), 1.0, epsilon = 1e-12);
    }

    #[tokio::test]
    async fn test_unpowered_output_is_silent() {
        let mut session = SimulatedSession::new("CHY", &model(2.0, 0.0));
        session
            .generate(AnalogOutput::Dc {
                channel: 0,
                offset: 1.0,
            })
            .await
            .unwrap();
        let acquisition = session.acquire(&request(vec![1], 1e4, 8)).await.unwrap();
        assert!(acquisition.waveforms[0].samples().iter().all(|&s| s == 0.0));
    }

    #[tokio::test]
    async fn test_rate_is_rounded_to_a_clock_divider() {
        let mut session = SimulatedSession::new("CHX", &model(1.0, 0.0));
        let acquisition = session
            .acquire(&request(vec![0], 819_200.0, 64))
            .await
            .unwrap();
        assert_relative_eq!(acquisition.sample_rate, 100e6 / 122.0);

        let capped = session
            .acquire(&request(vec![0], 1e9, 64))
            .await
            .unwrap();
        assert_relative_eq!(capped.sample_rate, 100e6);
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let mut session = SimulatedSession::new("CHX", &model(1.0, 0.0));
        assert!(session.acquire(&request(vec![0], 1e3, 0)).await.is_err());
        assert!(session.acquire(&request(vec![0], 1e3, 10_000)).await.is_err());
        assert!(session.acquire(&request(vec![2], 1e3, 10)).await.is_err());
        assert!(session.acquire(&request(vec![], 1e3, 10)).await.is_err());
        assert!(session.acquire(&request(vec![0], 0.0, 10)).await.is_err());
        assert!(session
            .generate(AnalogOutput::Dc {
                channel: 3,
                offset: 0.0
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_event_log_and_injected_failures() {
        let mut session = SimulatedSession::new("CHZ", &model(1.0, 0.0));
        let log = session.event_log();
        session.inject_failures(1);

        assert!(matches!(
            session.power_on().await,
            Err(HardwareError::Communication(_))
        ));
        session.power_on().await.unwrap();
        session.power_off().await.unwrap();
        assert!(!session.is_powered());

        let events = log.lock().unwrap().clone();
        assert_eq!(events, vec![SessionEvent::PowerOn, SessionEvent::PowerOff]);
    }
}
