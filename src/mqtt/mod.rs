pub mod ha_interface;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, ClientError, Event, LastWill, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::{MeterConfig, MqttConfig, PayloadStyle};
use crate::models::MeterReading;
use crate::mqtt::ha_interface::HaSensor;


#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MqttConnectionStatus {
    Connected,
    Disconnected,
    Error(String),
}

#[derive(Clone)]
pub struct MqttHealthStatus {
    pub status: MqttConnectionStatus,
    pub last_connected: Option<Instant>,
    pub last_message_sent: Option<Instant>,
    pub connection_attempts: u64,
}

impl MqttHealthStatus {
    pub fn new() -> Self {
        Self {
            status: MqttConnectionStatus::Disconnected,
            last_connected: None,
            last_message_sent: None,
            connection_attempts: 0,
        }
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Broker not connected ({0:?})")]
    NotConnected(MqttConnectionStatus),
    #[error("MQTT client error: {0}")]
    Client(#[from] ClientError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishData {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

/// Delivers messages to the broker
pub trait Publisher {
    fn publish(&self, data: PublishData) -> impl Future<Output = Result<(), PublishError>>;
}

/// Only qos 0 and 1 are used, anything above is sent at least once
pub fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        _ => QoS::AtLeastOnce,
    }
}

pub fn reading_topic(base_topic: &str, style: &PayloadStyle, meter_id: &str, meter_name: &str) -> String {
    let base = base_topic.trim_end_matches('/');
    return match style {
        PayloadStyle::State => format!("{base}/{meter_name}/state"),
        PayloadStyle::Json => format!("{base}/{meter_id}/meter_reading"),
    };
}

/// Builds the retained message carrying one reading
pub fn reading_message(base_topic: &str, style: &PayloadStyle, reading: &MeterReading) -> PublishData {
    let topic = reading_topic(base_topic, style, &reading.meter_id, &reading.meter_name);

    let payload = match style {
        PayloadStyle::State => reading.value.clone(),
        PayloadStyle::Json => {
            let meter_time = match &reading.timestamp {
                Some(t) => t.clone(),
                None => chrono::Local::now().to_rfc3339(),
            };
            serde_json::json!({
                "meter_value": reading.value,
                "meter_time": meter_time,
            }).to_string()
        }
    };

    return PublishData { topic, payload, qos: 1, retain: true };
}

/// Persistent broker connection with its event loop running in a task
pub struct MqttPublisher {
    client: AsyncClient,
    health: Arc<RwLock<MqttHealthStatus>>,
    availability_topic: String,
    eventloop: JoinHandle<()>,
}

impl MqttPublisher {
    pub fn new(config: &MqttConfig, meters: &[MeterConfig], style: &PayloadStyle) -> Self {
        info!("MQTT connection to {}:{} starting up", config.host, config.port);

        /* the broker drops older sessions with the same id */
        let client_id = format!("{}-{}", config.client_name, &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let mut mqttoptions = MqttOptions::new(client_id, config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if let Some(user) = &config.user {
            mqttoptions.set_credentials(user.clone(), config.password.clone().unwrap_or_default());
        }

        let availability_topic = config.availability_topic();
        mqttoptions.set_last_will(LastWill::new(availability_topic.clone(), "offline", QoS::AtLeastOnce, true));

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

        let mut announcements: Vec<PublishData> = vec![PublishData {
            topic: availability_topic.clone(),
            payload: "online".to_string(),
            qos: 1,
            retain: true,
        }];

        if config.ha_enabled {
            for meter in meters.iter() {
                match HaSensor::new(meter, config, style).to_publish() {
                    Ok(p) => announcements.push(p),
                    Err(e) => error!("Unable to build discovery for meter {}: {e}", meter.id),
                }
            }
        }

        let health = Arc::new(RwLock::new(MqttHealthStatus::new()));
        let health_c = health.clone();
        let reconnect_c = client.clone();
        let host = config.host.clone();
        let port = config.port;

        let handle = tokio::spawn(async move {
            info!("[{host}:{port}] MQTT Eventloop started");
            let mut last_error = String::new();
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("[{host}:{port}] Connected, announcing {} messages", announcements.len());
                        {
                            let mut h = health_c.write().await;
                            h.status = MqttConnectionStatus::Connected;
                            h.last_connected = Some(Instant::now());
                            h.connection_attempts += 1;
                        }
                        last_error.clear();

                        /* publishing from here would block the loop that drains the queue */
                        for msg in announcements.iter().cloned() {
                            let c = reconnect_c.clone();
                            tokio::spawn(async move {
                                if let Err(e) = c.publish(msg.topic, qos_from_u8(msg.qos), msg.retain, msg.payload).await {
                                    error!("Error announcing: {e}");
                                }
                            });
                        }
                    },
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("[{host}:{port}] Broker closed the connection");
                        health_c.write().await.status = MqttConnectionStatus::Disconnected;
                    },
                    Ok(_) => {},
                    Err(e) => {
                        let err = e.to_string();
                        if err != last_error {
                            error!("[{host}:{port}] Error in MQTT {err}, reconnecting");
                            last_error = err.clone();
                        }
                        health_c.write().await.status = MqttConnectionStatus::Error(err);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        return MqttPublisher {
            client,
            health,
            availability_topic,
            eventloop: handle,
        };
    }

    pub async fn health(&self) -> MqttHealthStatus {
        return self.health.read().await.clone();
    }

    /// Marks us offline and closes the connection
    pub async fn shutdown(self) {
        if self.health().await.status == MqttConnectionStatus::Connected {
            if let Err(e) = self.client.try_publish(self.availability_topic.clone(), QoS::AtLeastOnce, true, "offline") {
                warn!("Unable to publish offline state: {e}");
            }
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect failed: {e}");
        }

        /* give the event loop a moment to flush */
        let mut eventloop = self.eventloop;
        let _ = tokio::time::timeout(Duration::from_millis(500), &mut eventloop).await;
        eventloop.abort();
    }
}

impl Publisher for MqttPublisher {
    async fn publish(&self, data: PublishData) -> Result<(), PublishError> {
        let status = self.health.read().await.status.clone();
        if status != MqttConnectionStatus::Connected {
            return Err(PublishError::NotConnected(status));
        }

        /* never wait for room in the queue, a dead broker must not stall the loop */
        self.client.try_publish(data.topic, qos_from_u8(data.qos), data.retain, data.payload)?;

        debug!("Published successfully");
        self.health.write().await.last_message_sent = Some(Instant::now());
        return Ok(());
    }
}
