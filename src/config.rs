//! # Client Configuration
//!
//! Connection-string parsing and the explicit configuration struct carried
//! by the client and its transport. All tunables live here; nothing is a
//! process-wide static.
//!
//! A connection string is a set of `;`-delimited `key=value` pairs:
//!
//! ```text
//! HostName=contoso.hubline.dev;DeviceId=thermostat-12;SharedAccessKey=...
//! ```
//!
//! Exactly one credential form must be present: `SharedAccessKey` or
//! `SharedAccessSignature`, never both and never neither.

use std::path::PathBuf;
use std::time::Duration;

use crate::auth::TokenValidity;
use crate::error::{HublineError, Result};
use crate::transport::TransportProtocol;

/// Seconds a freshly requested authorization token stays valid.
pub const DEFAULT_TOKEN_VALID_SECS: u64 = 3600;
/// Upper bound on any single network round-trip.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(240_000);
/// Seconds the hub holds a received message locked for acknowledgment.
pub const DEFAULT_MESSAGE_LOCK_TIMEOUT_SECS: u64 = 180;

/// Send-task period for the connection-oriented transports.
pub const DEFAULT_SEND_PERIOD: Duration = Duration::from_millis(10);
/// Receive-task period for the connection-oriented transports.
pub const DEFAULT_RECEIVE_PERIOD: Duration = Duration::from_millis(10);
/// Send-task period over HTTPS, where every send is a full request.
pub const DEFAULT_SEND_PERIOD_HTTPS: Duration = Duration::from_secs(5);
/// Receive-task period over HTTPS. Polling faster invites throttling.
pub const DEFAULT_RECEIVE_PERIOD_HTTPS: Duration = Duration::from_secs(25 * 60);

const HOSTNAME_KEY: &str = "HostName";
const DEVICE_ID_KEY: &str = "DeviceId";
const GATEWAY_HOSTNAME_KEY: &str = "GatewayHostName";
const SHARED_ACCESS_KEY_KEY: &str = "SharedAccessKey";
const SHARED_ACCESS_SIGNATURE_KEY: &str = "SharedAccessSignature";

/// Exactly one credential form accompanies a device identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Symmetric device key; token generation is delegated to a
    /// [`crate::auth::TokenProvider`].
    SharedAccessKey(String),
    /// Pre-signed shared access signature used as-is.
    SharedAccessSignature(String),
}

impl Credential {
    pub fn is_key_based(&self) -> bool {
        matches!(self, Credential::SharedAccessKey(_))
    }
}

/// Parsed form of a device connection string.
#[derive(Debug, Clone)]
pub struct ConnectionString {
    pub hostname: String,
    pub gateway_hostname: Option<String>,
    pub device_id: String,
    pub credential: Credential,
}

impl ConnectionString {
    /// Parses a `;`-delimited `key=value` descriptor.
    ///
    /// Later occurrences of a key override earlier ones; unrecognized keys
    /// are ignored. The device ID is URL-decoded. The hostname must carry
    /// the hub name as a dot-separated prefix.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let mut hostname = None;
        let mut gateway_hostname = None;
        let mut device_id = None;
        let mut shared_access_key = None;
        let mut shared_access_signature = None;

        for pair in descriptor.split(';') {
            if pair.is_empty() {
                continue;
            }
            let Some((key, value)) = pair.split_once('=') else {
                return Err(HublineError::Configuration(format!(
                    "connection string segment '{pair}' is not a key=value pair"
                )));
            };
            match key {
                HOSTNAME_KEY => hostname = Some(value.to_string()),
                DEVICE_ID_KEY => device_id = Some(url_decode(value)?),
                GATEWAY_HOSTNAME_KEY => gateway_hostname = Some(value.to_string()),
                SHARED_ACCESS_KEY_KEY => shared_access_key = Some(value.to_string()),
                SHARED_ACCESS_SIGNATURE_KEY => {
                    shared_access_signature = Some(value.to_string());
                }
                _ => {}
            }
        }

        let hostname = hostname.ok_or_else(|| {
            HublineError::Configuration("connection string is missing HostName".to_string())
        })?;
        if !hostname.contains('.') {
            return Err(HublineError::Configuration(format!(
                "hostname '{hostname}' does not carry a hub name prefix"
            )));
        }

        let device_id = device_id.ok_or_else(|| {
            HublineError::Configuration("connection string is missing DeviceId".to_string())
        })?;
        if device_id.is_empty() {
            return Err(HublineError::Configuration(
                "DeviceId cannot be empty".to_string(),
            ));
        }

        let credential = match (shared_access_key, shared_access_signature) {
            (Some(key), None) => Credential::SharedAccessKey(key),
            (None, Some(signature)) => Credential::SharedAccessSignature(signature),
            (Some(_), Some(_)) => {
                return Err(HublineError::Configuration(
                    "connection string carries both SharedAccessKey and SharedAccessSignature"
                        .to_string(),
                ));
            }
            (None, None) => {
                return Err(HublineError::Configuration(
                    "connection string carries neither SharedAccessKey nor SharedAccessSignature"
                        .to_string(),
                ));
            }
        };

        Ok(Self {
            hostname,
            gateway_hostname,
            device_id,
            credential,
        })
    }

    /// The hub name, the dot-separated prefix of the hostname.
    pub fn hub_name(&self) -> &str {
        self.hostname.split('.').next().unwrap_or(&self.hostname)
    }
}

/// Percent-decodes a connection string component.
fn url_decode(component: &str) -> Result<String> {
    let bytes = component.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3).ok_or_else(|| {
                    HublineError::Configuration(format!(
                        "truncated percent escape in '{component}'"
                    ))
                })?;
                let hex = std::str::from_utf8(hex).map_err(|_| {
                    HublineError::Configuration(format!("invalid percent escape in '{component}'"))
                })?;
                let byte = u8::from_str_radix(hex, 16).map_err(|_| {
                    HublineError::Configuration(format!("invalid percent escape in '{component}'"))
                })?;
                decoded.push(byte);
                i += 3;
            }
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            other => {
                decoded.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8(decoded).map_err(|_| {
        HublineError::Configuration(format!("'{component}' is not valid UTF-8 once decoded"))
    })
}

/// Everything a transport needs to talk to the hub for one device.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub hostname: String,
    pub hub_name: String,
    pub gateway_hostname: Option<String>,
    pub device_id: String,
    pub credential: Credential,
    /// Shared, atomically updatable token validity window. Cloning the
    /// config shares the same window.
    pub token_validity: TokenValidity,
    pub read_timeout: Duration,
    pub message_lock_timeout_secs: u64,
    pub send_period: Duration,
    pub receive_period: Duration,
    /// Trusted-certificate path for AMQP connections.
    pub certificate_path: Option<PathBuf>,
}

impl ClientConfig {
    /// Builds a config from a parsed connection string with the default
    /// periods for the given protocol.
    pub fn for_protocol(descriptor: ConnectionString, protocol: TransportProtocol) -> Self {
        let (send_period, receive_period) = match protocol {
            TransportProtocol::Https => (DEFAULT_SEND_PERIOD_HTTPS, DEFAULT_RECEIVE_PERIOD_HTTPS),
            TransportProtocol::Amqps
            | TransportProtocol::AmqpsWs
            | TransportProtocol::Mqtt => (DEFAULT_SEND_PERIOD, DEFAULT_RECEIVE_PERIOD),
        };

        let hub_name = descriptor.hub_name().to_string();
        Self {
            hostname: descriptor.hostname,
            hub_name,
            gateway_hostname: descriptor.gateway_hostname,
            device_id: descriptor.device_id,
            credential: descriptor.credential,
            token_validity: TokenValidity::new(DEFAULT_TOKEN_VALID_SECS),
            read_timeout: DEFAULT_READ_TIMEOUT,
            message_lock_timeout_secs: DEFAULT_MESSAGE_LOCK_TIMEOUT_SECS,
            send_period,
            receive_period,
            certificate_path: None,
        }
    }

    /// The resource a token must authorize: the device endpoint on the hub.
    pub fn resource_uri(&self) -> String {
        format!("{}/devices/{}", self.hostname, self.device_id)
    }

    /// Host the wire connection dials: the protocol gateway when one is
    /// configured, the hub itself otherwise.
    pub fn endpoint_host(&self) -> &str {
        self.gateway_hostname.as_deref().unwrap_or(&self.hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_DESCRIPTOR: &str =
        "HostName=contoso.hubline.dev;DeviceId=thermostat-12;SharedAccessKey=c2VjcmV0";

    #[test]
    fn parses_key_based_descriptor() {
        let parsed = ConnectionString::parse(KEY_DESCRIPTOR).unwrap();
        assert_eq!(parsed.hostname, "contoso.hubline.dev");
        assert_eq!(parsed.hub_name(), "contoso");
        assert_eq!(parsed.device_id, "thermostat-12");
        assert_eq!(
            parsed.credential,
            Credential::SharedAccessKey("c2VjcmV0".to_string())
        );
        assert!(parsed.gateway_hostname.is_none());
    }

    #[test]
    fn parses_signature_and_gateway() {
        let parsed = ConnectionString::parse(
            "HostName=contoso.hubline.dev;GatewayHostName=edge.local;DeviceId=d1;\
             SharedAccessSignature=SharedAccessSignature sr=x&sig=y&se=z",
        )
        .unwrap();
        assert!(!parsed.credential.is_key_based());
        assert_eq!(parsed.gateway_hostname.as_deref(), Some("edge.local"));
    }

    #[test]
    fn device_id_is_url_decoded() {
        let parsed = ConnectionString::parse(
            "HostName=contoso.hubline.dev;DeviceId=floor%202%2Bsensor;SharedAccessKey=k",
        )
        .unwrap();
        assert_eq!(parsed.device_id, "floor 2+sensor");
    }

    #[test]
    fn both_credentials_are_rejected() {
        let err = ConnectionString::parse(
            "HostName=contoso.hubline.dev;DeviceId=d1;SharedAccessKey=X;SharedAccessSignature=Y",
        )
        .unwrap_err();
        assert!(matches!(err, HublineError::Configuration(_)));
    }

    #[test]
    fn missing_credential_is_rejected() {
        let err =
            ConnectionString::parse("HostName=contoso.hubline.dev;DeviceId=d1").unwrap_err();
        assert!(matches!(err, HublineError::Configuration(_)));
    }

    #[test]
    fn hostname_without_hub_prefix_is_rejected() {
        let err =
            ConnectionString::parse("HostName=localhost;DeviceId=d1;SharedAccessKey=k")
                .unwrap_err();
        assert!(matches!(err, HublineError::Configuration(_)));
    }

    #[test]
    fn missing_hostname_or_device_id_is_rejected() {
        assert!(ConnectionString::parse("DeviceId=d1;SharedAccessKey=k").is_err());
        assert!(
            ConnectionString::parse("HostName=contoso.hubline.dev;SharedAccessKey=k").is_err()
        );
    }

    #[test]
    fn protocol_defaults_differ_for_https() {
        let https = ClientConfig::for_protocol(
            ConnectionString::parse(KEY_DESCRIPTOR).unwrap(),
            TransportProtocol::Https,
        );
        assert_eq!(https.receive_period, DEFAULT_RECEIVE_PERIOD_HTTPS);
        assert_eq!(https.send_period, DEFAULT_SEND_PERIOD_HTTPS);

        let mqtt = ClientConfig::for_protocol(
            ConnectionString::parse(KEY_DESCRIPTOR).unwrap(),
            TransportProtocol::Mqtt,
        );
        assert_eq!(mqtt.receive_period, DEFAULT_RECEIVE_PERIOD);
        assert_eq!(mqtt.resource_uri(), "contoso.hubline.dev/devices/thermostat-12");
    }

    #[test]
    fn gateway_overrides_the_dialed_endpoint() {
        let direct = ClientConfig::for_protocol(
            ConnectionString::parse(KEY_DESCRIPTOR).unwrap(),
            TransportProtocol::Mqtt,
        );
        assert_eq!(direct.endpoint_host(), "contoso.hubline.dev");

        let gatewayed = ClientConfig::for_protocol(
            ConnectionString::parse(
                "HostName=contoso.hubline.dev;GatewayHostName=edge.local;DeviceId=d1;\
                 SharedAccessKey=k",
            )
            .unwrap(),
            TransportProtocol::Mqtt,
        );
        assert_eq!(gatewayed.endpoint_host(), "edge.local");
        assert_eq!(
            gatewayed.resource_uri(),
            "contoso.hubline.dev/devices/d1",
            "tokens authorize the hub resource even through a gateway"
        );
    }
}
