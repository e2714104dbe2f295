//! Supervisor for rtl_tcp and rtlamr
//!
//! This library keeps the tuner and the decoder running, turns the decoder
//! output into meter readings and relays them to an MQTT broker.

pub mod config;
pub mod cycle;
pub mod models;
pub mod mqtt;
pub mod os_signals;
pub mod parser;
pub mod process;
pub mod supervisor;
pub mod usb;

// Re-export common types for easier access
pub use config::{Config, MeterConfig};
pub use cycle::CycleTracker;
pub use models::{LineFormat, MeterReading, ReadingRecord};
pub use mqtt::{MqttPublisher, PublishData, Publisher};
pub use parser::{ParseError, StreamParser};
pub use process::{ChildProcessHandle, CommandSpec, ProcessState};
pub use supervisor::{Supervisor, SupervisorError, SupervisorState};
pub use usb::{DeviceReset, UsbDeviceReset};
