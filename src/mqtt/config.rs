use crate::config::{Config, MqttServer};

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub subbed_topics: Vec<String>,
    pub server: MqttServer,
    pub client_id: String,
}

impl MqttConfig {
    pub fn from_config(config: &Config, role: &str) -> Self {
        MqttConfig {
            subbed_topics: config.topics().subscriptions(),
            server: config.mqtt.clone(),
            client_id: format!(
                "{}{}-{}",
                config.mqtt.client_prefix,
                role,
                std::process::id()
            ),
        }
    }
}
