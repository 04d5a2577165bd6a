//! Device connection-string parsing.

use std::str::FromStr;

use thiserror::Error;

/// Environment variable consulted when no connection string is passed
/// explicitly.
pub const CONNECTION_STRING_ENV: &str = "IOTHUB_DEVICE_CONNECTION_STRING";

/// Connection-string parse error.
#[derive(Debug, Error)]
pub enum ConnectionStringError {
    #[error("no connection string provided and {CONNECTION_STRING_ENV} is unset")]
    Missing,
    #[error("malformed connection string segment: {0:?}")]
    MalformedSegment(String),
    #[error("connection string is missing required field {0}")]
    MissingField(&'static str),
}

/// Parsed device connection string.
///
/// The format is the semicolon-separated `Key=Value` list the hub hands
/// out per device:
/// `HostName=<hub>;DeviceId=<id>;SharedAccessKey=<base64>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub host_name: String,
    pub device_id: String,
    pub shared_access_key: String,
    /// Optional edge gateway in front of the hub.
    pub gateway_host_name: Option<String>,
}

impl ConnectionString {
    /// Resolve a connection string from an explicit value or, failing
    /// that, from [`CONNECTION_STRING_ENV`].
    ///
    /// # Errors
    /// Returns `Missing` when neither source is set, or a parse error.
    pub fn resolve(explicit: Option<&str>) -> Result<Self, ConnectionStringError> {
        match explicit {
            Some(raw) => raw.parse(),
            None => std::env::var(CONNECTION_STRING_ENV)
                .ok()
                .filter(|raw| !raw.trim().is_empty())
                .ok_or(ConnectionStringError::Missing)?
                .parse(),
        }
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut device_id = None;
        let mut shared_access_key = None;
        let mut gateway_host_name = None;

        for segment in raw.split(';').filter(|s| !s.trim().is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::MalformedSegment(segment.to_owned()))?;
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            // Unknown keys are ignored; the SDK grows new ones.
            match key.trim() {
                "HostName" => host_name = Some(value.to_owned()),
                "DeviceId" => device_id = Some(value.to_owned()),
                "SharedAccessKey" => shared_access_key = Some(value.to_owned()),
                "GatewayHostName" => gateway_host_name = Some(value.to_owned()),
                _ => {}
            }
        }

        Ok(Self {
            host_name: host_name.ok_or(ConnectionStringError::MissingField("HostName"))?,
            device_id: device_id.ok_or(ConnectionStringError::MissingField("DeviceId"))?,
            shared_access_key: shared_access_key
                .ok_or(ConnectionStringError::MissingField("SharedAccessKey"))?,
            gateway_host_name,
        })
    }
}
