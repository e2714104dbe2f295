//! The supervision loop around rtl_tcp and rtlamr.
//!
//! ```text
//! StartingTuner -> StartingDecoder -> Reading -> CycleSleep -> StartingTuner
//!        \               \              \
//!         +---------------+--------------+--> ErrorRecovery -> StartingTuner
//! ```
//!
//! With a cycle duration of zero the loop stays in `Reading` and publishes
//! every reading. Any state moves to `Terminating` once the cancellation
//! token fires, which stops both processes and ends [`Supervisor::run`].

use std::path::PathBuf;
use std::time::Duration;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::io::BufReader;
use tokio::process::ChildStdout;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, PayloadStyle, PublishFailurePolicy};
use crate::cycle::CycleTracker;
use crate::models::MeterReading;
use crate::mqtt::{reading_message, PublishError, Publisher};
use crate::parser::StreamParser;
use crate::process::{commands, ChildProcessHandle, CommandSpec, ProcessError};
use crate::usb::DeviceReset;

pub mod reader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    StartingTuner,
    StartingDecoder,
    Reading,
    CycleSleep,
    ErrorRecovery { reset_device: bool },
    Terminating,
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("{0} exited unexpectedly")]
    ProcessExited(String),
    #[error("No reading within {0:?}")]
    ReadTimeout(Duration),
    #[error("Decoder output ended")]
    StreamEnded,
    #[error("Reading decoder output failed: {0}")]
    Stream(std::io::Error),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl SupervisorError {
    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorError::Process(ProcessError::Spawn { .. }) => "spawn",
            SupervisorError::Process(_) => "process",
            SupervisorError::ProcessExited(_) => "process-exited",
            SupervisorError::ReadTimeout(_) => "read-timeout",
            SupervisorError::StreamEnded => "stream-ended",
            SupervisorError::Stream(_) => "stream",
            SupervisorError::Publish(_) => "publish",
        }
    }

    /// Faults that usually mean the receiver hung and needs a USB reset
    pub fn suggests_hardware_fault(&self) -> bool {
        return matches!(self,
            SupervisorError::ProcessExited(_)
            | SupervisorError::ReadTimeout(_)
            | SupervisorError::StreamEnded
            | SupervisorError::Stream(_));
    }
}

/// Timing and policy knobs of the loop, taken from the `general` and `mqtt` sections
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub cycle_duration: Duration,
    pub read_timeout: Option<Duration>,
    pub tuner_settle: Duration,
    pub grace_period: Duration,
    pub recovery_backoff: Duration,
    pub usb_device: Option<PathBuf>,
    pub payload: PayloadStyle,
    pub base_topic: String,
    pub publish_failure: PublishFailurePolicy,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        let general = &config.general;
        return SupervisorSettings {
            cycle_duration: general.cycle_duration(),
            read_timeout: general.read_timeout(),
            tuner_settle: general.tuner_settle(),
            grace_period: general.grace_period(),
            recovery_backoff: general.recovery_backoff(),
            usb_device: general.usb_device().map(|p| p.to_path_buf()),
            payload: general.payload.clone(),
            base_topic: config.mqtt.base_topic.clone(),
            publish_failure: general.publish_failure,
        }
    }

    pub fn cycle_mode(&self) -> bool {
        return !self.cycle_duration.is_zero();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub tuner_starts: u64,
    pub decoder_starts: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub cycles_completed: u64,
    pub recoveries: u64,
    pub device_resets: u64,
}

/// Owns both child processes and drives them through [`SupervisorState`]
pub struct Supervisor<P: Publisher, R: DeviceReset> {
    settings: SupervisorSettings,
    tuner_cmd: CommandSpec,
    decoder_cmd: CommandSpec,
    parser: StreamParser,
    tracker: CycleTracker,
    tuner: ChildProcessHandle,
    decoder: ChildProcessHandle,
    output: Option<BufReader<ChildStdout>>,
    publisher: P,
    resetter: R,
    cancel: CancellationToken,
    state: SupervisorState,
    stats: SupervisorStats,
}

impl<P: Publisher, R: DeviceReset> Supervisor<P, R> {
    pub fn new(config: &Config, publisher: P, resetter: R, cancel: CancellationToken) -> Self {
        return Supervisor {
            settings: SupervisorSettings::from_config(config),
            tuner_cmd: commands::tuner_command(config),
            decoder_cmd: commands::decoder_command(config),
            parser: StreamParser::new(config.general.format, &config.meters),
            tracker: CycleTracker::new(config.meter_ids()),
            tuner: ChildProcessHandle::new("rtl_tcp"),
            decoder: ChildProcessHandle::new("rtlamr"),
            output: None,
            publisher,
            resetter,
            cancel,
            state: SupervisorState::StartingTuner,
            stats: SupervisorStats::default(),
        }
    }

    /// Replaces the command lines built from the config
    pub fn with_commands(mut self, tuner: CommandSpec, decoder: CommandSpec) -> Self {
        self.tuner_cmd = tuner;
        self.decoder_cmd = decoder.with_stdout();
        return self;
    }

    pub fn state(&self) -> SupervisorState {
        return self.state;
    }

    pub fn stats(&self) -> &SupervisorStats {
        return &self.stats;
    }

    pub fn processes_running(&mut self) -> bool {
        let tuner = self.tuner.is_alive();
        let decoder = self.decoder.is_alive();
        return tuner || decoder;
    }

    pub fn into_publisher(self) -> P {
        return self.publisher;
    }

    /// Runs until the cancellation token fires, both processes are stopped
    /// when this returns.
    pub async fn run(&mut self) {
        info!("Supervisor starting: tuner `{}`, decoder `{}`", self.tuner_cmd.command_line(), self.decoder_cmd.command_line());
        if self.settings.cycle_mode() {
            info!("Cycle mode, sleeping {:?} once all meters reported", self.settings.cycle_duration);
        } else {
            info!("Continuous mode, every reading is published");
        }

        let cancel = self.cancel.clone();
        while self.state != SupervisorState::Terminating {
            let state = self.state;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = self.step(state) => Some(r),
            };

            let next = match outcome {
                None => SupervisorState::Terminating,
                Some(Ok(next)) => next,
                Some(Err(e)) => self.fault(e),
            };

            if next != self.state {
                debug!("{:?} -> {next:?}", self.state);
            }
            self.state = next;
        }

        self.terminate().await;
    }

    async fn step(&mut self, state: SupervisorState) -> Result<SupervisorState, SupervisorError> {
        match state {
            SupervisorState::StartingTuner => self.start_tuner().await,
            SupervisorState::StartingDecoder => self.start_decoder(),
            SupervisorState::Reading => self.read().await,
            SupervisorState::CycleSleep => self.cycle_sleep().await,
            SupervisorState::ErrorRecovery { reset_device } => self.recover(reset_device).await,
            SupervisorState::Terminating => Ok(SupervisorState::Terminating),
        }
    }

    fn fault(&mut self, e: SupervisorError) -> SupervisorState {
        error!("{} fault in {:?}: {e}", e.kind(), self.state);
        self.stats.recoveries += 1;
        return SupervisorState::ErrorRecovery { reset_device: e.suggests_hardware_fault() };
    }

    async fn start_tuner(&mut self) -> Result<SupervisorState, SupervisorError> {
        /* a tuner of an interrupted attempt would still hold the port */
        self.tuner.stop(self.settings.grace_period).await;
        self.tuner.start(&self.tuner_cmd)?;
        self.stats.tuner_starts += 1;

        /* rtl_tcp has to listen before rtlamr may connect */
        if !self.settings.tuner_settle.is_zero() {
            debug!("Waiting {:?} for rtl_tcp", self.settings.tuner_settle);
            tokio::time::sleep(self.settings.tuner_settle).await;
        }

        if !self.tuner.is_alive() {
            return Err(SupervisorError::ProcessExited(self.tuner.name().to_string()));
        }

        return Ok(SupervisorState::StartingDecoder);
    }

    fn start_decoder(&mut self) -> Result<SupervisorState, SupervisorError> {
        if self.output.is_some() && self.decoder.is_alive() {
            debug!("rtlamr is still running, keeping it");
            return Ok(SupervisorState::Reading);
        }

        self.output = None;
        self.decoder.start(&self.decoder_cmd)?;
        self.stats.decoder_starts += 1;

        let stdout = self.decoder.take_stdout()?;
        self.output = Some(BufReader::new(stdout));
        return Ok(SupervisorState::Reading);
    }

    /// Waits for one reading and publishes it
    async fn read(&mut self) -> Result<SupervisorState, SupervisorError> {
        let output = match self.output.as_mut() {
            Some(l) => l,
            None => return Err(SupervisorError::StreamEnded),
        };

        let reading = reader::next_reading(output, &self.parser, self.settings.read_timeout).await?;

        if !self.settings.cycle_mode() {
            self.publish_reading(&reading).await?;
            return Ok(SupervisorState::Reading);
        }

        if self.tracker.is_seen(&reading.meter_id) {
            debug!("Meter {} already reported in this cycle", reading.meter_id);
            return Ok(SupervisorState::Reading);
        }

        /* a failed publish leaves the meter open for another reading */
        if self.publish_reading(&reading).await? {
            self.tracker.mark_seen(&reading.meter_id);
        }

        if self.tracker.is_cycle_complete() {
            info!("All meters reported, cycle complete");
            self.stats.cycles_completed += 1;
            return Ok(SupervisorState::CycleSleep);
        }

        debug!("Still waiting for meters {:?}", self.tracker.missing());
        return Ok(SupervisorState::Reading);
    }

    /// `Ok(false)` is a failed publish the policy lets us ignore
    async fn publish_reading(&mut self, reading: &MeterReading) -> Result<bool, SupervisorError> {
        let msg = reading_message(&self.settings.base_topic, &self.settings.payload, reading);
        info!("Sending meter {} to {}: {}", reading.meter_id, msg.topic, msg.payload);

        match self.publisher.publish(msg).await {
            Ok(()) => {
                self.stats.published += 1;
                return Ok(true);
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                match self.settings.publish_failure {
                    PublishFailurePolicy::Continue => {
                        error!("publish fault: {e}, continuing");
                        return Ok(false);
                    }
                    PublishFailurePolicy::Restart => return Err(e.into()),
                }
            }
        }
    }

    async fn cycle_sleep(&mut self) -> Result<SupervisorState, SupervisorError> {
        self.stop_processes().await;
        self.tracker.reset();

        info!("Sleeping for {:?}", self.settings.cycle_duration);
        tokio::time::sleep(self.settings.cycle_duration).await;
        return Ok(SupervisorState::StartingTuner);
    }

    async fn recover(&mut self, reset_device: bool) -> Result<SupervisorState, SupervisorError> {
        self.stop_processes().await;

        if reset_device {
            match &self.settings.usb_device {
                Some(device) => {
                    self.stats.device_resets += 1;
                    if let Err(e) = self.resetter.reset(device) {
                        error!("reset fault: {e}");
                    }
                }
                None => debug!("No USB device configured, skipping reset"),
            }
        }

        if !self.settings.recovery_backoff.is_zero() {
            warn!("Restarting in {:?}", self.settings.recovery_backoff);
            tokio::time::sleep(self.settings.recovery_backoff).await;
        }
        return Ok(SupervisorState::StartingTuner);
    }

    async fn stop_processes(&mut self) {
        /* closing the pipe first lets rtlamr notice it is going away */
        self.output = None;

        let grace = self.settings.grace_period;
        tokio::join!(self.tuner.stop(grace), self.decoder.stop(grace));
    }

    async fn terminate(&mut self) {
        info!("Shutting down, stopping rtl_tcp and rtlamr");
        self.stop_processes().await;
        info!("Supervisor stopped after {} published readings", self.stats.published);
    }
}
