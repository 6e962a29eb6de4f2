use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read {path}: {source}")]
    DevicesFile {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    DevicesParse {
        path: String,
        source: serde_json::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status from {url}: got {status}, want 200 OK")]
    UnexpectedStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    #[error("MQTT connection failed: {0}")]
    MqttConnect(#[from] rumqttc::ConnectionError),

    #[error("Malformed command topic: {0}")]
    MalformedTopic(String),

    #[error("Unknown switch: {0}")]
    UnknownDevice(String),

    #[error("Relay queue for {0} is full")]
    RelayQueueFull(String),

    #[error("Relay worker for {0} has stopped")]
    RelayWorkerGone(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
