//! Broker endpoint parsing and TLS transport selection.
//!
//! Compatible with Home Assistant MQTT broker setups:
//! - Plain TCP to the add-on broker (`core-mosquitto:1883`)
//! - TLS with system roots, a custom CA, or mutual TLS with a client cert
//!
//! # Example
//!
//! ```ignore
//! let endpoint = parse_mqtt_endpoint("mqtts://broker.lan:8883", false)?;
//! let transport = TlsMaterials::default().build_transport(&endpoint)?;
//! ```

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::path::PathBuf;

/// TLS certificate materials for MQTT connections.
///
/// Mirrors Home Assistant's MQTT TLS configuration:
/// - `certificate`: CA cert path (like HA's CONF_CERTIFICATE)
/// - `client_cert`/`client_key`: Client auth (like HA's CONF_CLIENT_CERT/KEY)
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// PEM-encoded CA certificate bytes.
    /// When None, uses system/webpki root certificates (like HA's "auto" mode).
    pub ca: Option<Vec<u8>>,

    /// Client certificate and key for mutual TLS, as (cert, key).
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    /// Load TLS materials from file paths.
    ///
    /// CA path is optional; client cert and key must be provided together.
    pub fn load(
        ca_path: Option<&PathBuf>,
        client_cert_path: Option<&PathBuf>,
        client_key_path: Option<&PathBuf>,
    ) -> Result<Self> {
        let ca = match ca_path {
            Some(path) => Some(
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))?,
            ),
            None => None,
        };

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!(
                        "failed to read MQTT TLS client cert '{}'",
                        cert_path.display()
                    )
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!(
                        "failed to read MQTT TLS client key '{}'",
                        key_path.display()
                    )
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(anyhow!("MQTT TLS client certificate provided without key"))
            }
            (None, Some(_)) => {
                return Err(anyhow!("MQTT TLS client key provided without certificate"))
            }
        };

        Ok(Self { ca, client_auth })
    }

    /// Check if any TLS materials are configured.
    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }

    /// Build a rumqttc Transport for `endpoint`.
    ///
    /// # Errors
    /// - If TLS materials are provided but TLS is disabled
    /// - If client certificates are provided without a CA
    pub fn build_transport(&self, endpoint: &MqttEndpoint) -> Result<Transport> {
        if !endpoint.use_tls {
            if self.is_configured() {
                return Err(anyhow!(
                    "MQTT TLS materials provided but TLS is disabled.\n\
                     Use --mqtt-use-tls or the mqtts:// scheme to enable TLS."
                ));
            }
            return Ok(Transport::tcp());
        }

        if !self.is_configured() {
            return Ok(Transport::tls_with_default_config());
        }

        let ca = self.ca.clone().ok_or_else(|| {
            anyhow!(
                "MQTT TLS CA certificate is required when providing client certificates.\n\
                 Specify --mqtt-tls-ca-path or remove client cert configuration."
            )
        })?;
        Ok(Transport::tls(ca, self.client_auth.clone(), None))
    }
}

/// MQTT broker endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl std::fmt::Display for MqttEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTTS_PORT: u16 = 8883;

/// Parse an MQTT endpoint from an address string.
///
/// Supports formats:
/// - `host` (default port for the scheme)
/// - `host:port` (plain TCP or TLS based on tls_override)
/// - `mqtt://host:port` / `tcp://host:port` (plain TCP)
/// - `mqtts://host:port` / `ssl://host:port` (TLS)
/// - `[ipv6]:port` (IPv6 with brackets)
pub fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let mut use_tls = tls_override;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let default_port = if use_tls {
        DEFAULT_MQTTS_PORT
    } else {
        DEFAULT_MQTT_PORT
    };
    let (host, port) = split_host_port(remainder, default_port)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in '{}'", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str, default_port: u16) -> Result<(String, u16)> {
    // IPv6 in brackets: [::1]:1883
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => port
                .parse()
                .with_context(|| format!("invalid MQTT port in {}", addr))?,
            None if rest.is_empty() => default_port,
            None => return Err(anyhow!("invalid MQTT address: {}", addr)),
        };
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid MQTT port in {}", addr))?;
            Ok((host.to_string(), port))
        }
        None => Ok((addr.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_endpoint_plain() {
        let ep = parse_mqtt_endpoint("core-mosquitto:1883", false).unwrap();
        assert_eq!(ep.host, "core-mosquitto");
        assert_eq!(ep.port, 1883);
        assert!(!ep.use_tls);
    }

    #[test]
    fn parse_endpoint_defaults_port() {
        let ep = parse_mqtt_endpoint("core-mqtt", false).unwrap();
        assert_eq!(ep.port, 1883);
        let ep = parse_mqtt_endpoint("mqtts://broker.lan", false).unwrap();
        assert_eq!(ep.port, 8883);
        assert!(ep.use_tls);
    }

    #[test]
    fn parse_endpoint_mqtts_scheme() {
        let ep = parse_mqtt_endpoint("mqtts://broker.example.com:8883", false).unwrap();
        assert_eq!(ep.host, "broker.example.com");
        assert_eq!(ep.port, 8883);
        assert!(ep.use_tls);
    }

    #[test]
    fn parse_endpoint_tls_override() {
        let ep = parse_mqtt_endpoint("127.0.0.1:8883", true).unwrap();
        assert!(ep.use_tls);
    }

    #[test]
    fn parse_endpoint_ipv6() {
        let ep = parse_mqtt_endpoint("[::1]:1883", false).unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 1883);
        assert_eq!(ep.to_string(), "mqtt://[::1]:1883");
    }

    #[test]
    fn parse_endpoint_rejects_bad_input() {
        assert!(parse_mqtt_endpoint("ws://broker:80", false).is_err());
        assert!(parse_mqtt_endpoint("broker:notaport", false).is_err());
        assert!(parse_mqtt_endpoint(":1883", false).is_err());
    }

    #[test]
    fn tls_materials_requires_both_cert_and_key() {
        let cert_only =
            TlsMaterials::load(None, Some(&PathBuf::from("/nonexistent/cert.pem")), None);
        assert!(cert_only.is_err());
        assert!(cert_only.unwrap_err().to_string().contains("without key"));
    }

    #[test]
    fn materials_without_tls_are_rejected() {
        let endpoint = parse_mqtt_endpoint("broker:1883", false).unwrap();
        let materials = TlsMaterials {
            ca: Some(b"-----BEGIN CERTIFICATE-----".to_vec()),
            client_auth: None,
        };
        assert!(materials.build_transport(&endpoint).is_err());
        assert!(TlsMaterials::default().build_transport(&endpoint).is_ok());
    }
}
