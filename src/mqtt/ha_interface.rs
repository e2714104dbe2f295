use serde::Serialize;

use crate::config::{MeterConfig, MqttConfig, PayloadStyle};
use crate::mqtt::{reading_topic, PublishData};


#[derive(Serialize)]
pub struct HaDevice {
    ids: String,
    name: String,
    manufacturer: String,
    model: String,
}

#[derive(Serialize)]
pub struct HaOrigin {
    pub name: String,
    pub sw_version: String,
    pub support_url: String,
}

fn is_none_str(value: &String) -> bool {
    if value.is_empty() || value == "NONE" {
        return true;
    }
    return false;
}

/// Home Assistant MQTT discovery document of one meter
#[derive(Serialize)]
pub struct HaSensor {
    pub name: String,
    pub unique_id: String,
    pub object_id: String,
    pub state_topic: String,
    pub availability_topic: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub unit_of_measurement: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub icon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
    pub state_class: String,
    pub dev: HaDevice,
    pub o: HaOrigin,
    #[serde(skip_serializing)]
    pub discover_topic: String,
}

impl HaSensor {
    pub fn new(meter: &MeterConfig, mqtt: &MqttConfig, style: &PayloadStyle) -> Self {
        let name = meter.display_name();
        let safe_name = name.clone().replace(" ", "_").to_lowercase();

        /* json payloads carry the value in a field */
        let value_template = match style {
            PayloadStyle::Json => Some("{{ value_json.meter_value }}".to_string()),
            PayloadStyle::State => None,
        };

        return HaSensor {
            discover_topic: format!("{}/sensor/{}/config", mqtt.ha_prefix, safe_name),
            name: name.clone(),
            unique_id: format!("rtlamr_{}", meter.id),
            object_id: safe_name,
            state_topic: reading_topic(&mqtt.base_topic, style, &meter.id, &name),
            availability_topic: mqtt.availability_topic(),
            unit_of_measurement: meter.unit_of_measurement.clone().unwrap_or_default(),
            icon: meter.icon.clone().unwrap_or_default(),
            value_template,
            state_class: "total_increasing".to_string(),
            dev: HaDevice {
                ids: format!("rtlamr_{}", meter.id),
                name: name,
                manufacturer: "rtlamr".to_string(),
                model: meter.protocol.to_uppercase(),
            },
            o: HaOrigin {
                name: "rtlamr2mqtt".to_string(),
                sw_version: env!("CARGO_PKG_VERSION").to_string(),
                support_url: "https://github.com/bemasher/rtlamr".to_string(),
            },
        }
    }

    pub fn to_publish(&self) -> Result<PublishData, serde_json::Error> {
        return Ok(PublishData {
            topic: self.discover_topic.clone(),
            payload: serde_json::to_string(self)?,
            qos: 1,
            retain: true,
        });
    }
}
