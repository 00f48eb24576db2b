//! Settings file handling.

use std::fs;

use cbs_handshake::handshake::{LinkRole, LinkSpec};
use cbs_handshake::{
    Credentials, HandshakeError, Protocol, ProxyOptions, ServiceLink, Settings, TlsSource,
};
use tempfile::TempDir;

fn full_settings() -> Settings {
    Settings {
        host_name: "hub.example.net".into(),
        protocol: Protocol::AmqpsWs,
        user_name: Some("iothubowner".into()),
        sas_token: Some("SharedAccessSignature sr=hub.example.net&sig=abc".into()),
        proxy: Some(ProxyOptions::new("proxy.local", 3128).with_credentials("user", "pass")),
        ca_bundle: None,
        service_link: Some(ServiceLink::FileNotifications),
        timeout_secs: 30,
    }
}

// =============================================================================
// Load / save
// =============================================================================

#[test]
fn test_save_and_load() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("hub.toml");

    let settings = full_settings();
    settings.save(&path).unwrap();

    let loaded = Settings::load(&path).unwrap();
    assert_eq!(loaded.host_name, "hub.example.net");
    assert_eq!(loaded.protocol, Protocol::AmqpsWs);
    assert_eq!(loaded.user_name.as_deref(), Some("iothubowner"));
    assert_eq!(loaded.proxy, settings.proxy);
    assert_eq!(loaded.service_link, Some(ServiceLink::FileNotifications));
    assert_eq!(loaded.timeout().as_secs(), 30);
}

#[test]
fn test_load_minimal_file_uses_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("hub.toml");
    fs::write(
        &path,
        r#"
host_name = "hub.example.net"
user_name = "owner"
sas_token = "SharedAccessSignature sr=x"
"#,
    )
    .unwrap();

    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.protocol, Protocol::Amqps);
    assert_eq!(settings.timeout_secs, 60);
    assert!(settings.proxy.is_none());
    assert!(settings.service_link.is_none());
}

#[test]
fn test_load_custom_service_link() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("hub.toml");
    fs::write(
        &path,
        r#"
host_name = "hub.example.net"
protocol = "amqps_ws"
user_name = "owner"
sas_token = "SharedAccessSignature sr=x"

[proxy]
host = "proxy.local"
port = 8888

[service_link.custom]
name = "twin-sender"
address = "/devices/dev-1/twin"
role = "sender"
"#,
    )
    .unwrap();

    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.proxy, Some(ProxyOptions::new("proxy.local", 8888)));
    assert_eq!(
        settings.service_link,
        Some(ServiceLink::Custom(LinkSpec::new(
            "twin-sender",
            "/devices/dev-1/twin",
            LinkRole::Sender
        )))
    );
}

#[test]
fn test_load_missing_file() {
    let temp = TempDir::new().unwrap();
    let result = Settings::load(temp.path().join("absent.toml"));
    assert!(matches!(result, Err(HandshakeError::Config(_))));
}

#[test]
fn test_load_malformed_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("hub.toml");
    fs::write(&path, "host_name = [not toml").unwrap();

    let result = Settings::load(&path);
    assert!(matches!(result, Err(HandshakeError::Config(_))));
}

#[test]
fn test_load_unknown_protocol() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("hub.toml");
    fs::write(&path, "host_name = \"hub\"\nprotocol = \"mqtt\"\n").unwrap();

    assert!(Settings::load(&path).is_err());
}

// =============================================================================
// Conversion to a connection configuration
// =============================================================================

#[test]
fn test_to_connection_config() {
    let temp = TempDir::new().unwrap();
    let mut settings = full_settings();
    settings.ca_bundle = Some(temp.path().join("roots.pem"));

    let config = settings.to_connection_config().unwrap();
    assert_eq!(config.host_name, "hub.example.net");
    assert!(config.protocol.is_websocket());
    assert!(matches!(config.tls, TlsSource::CaBundle(_)));
    assert!(matches!(
        config.credentials,
        Credentials::SharedAccessSignature { ref user_name, .. } if user_name == "iothubowner"
    ));
    assert_eq!(config.service_link, Some(ServiceLink::FileNotifications));
}

#[test]
fn test_missing_sas_token_rejected() {
    let mut settings = full_settings();
    settings.sas_token = None;

    match settings.to_connection_config() {
        Err(HandshakeError::InvalidArgument(msg)) => {
            assert_eq!(msg, "sasToken can not be null or empty");
        }
        other => panic!("expected InvalidArgument, got {:?}", other),
    }
}

#[test]
fn test_zero_proxy_port_rejected() {
    let mut settings = full_settings();
    settings.proxy = Some(ProxyOptions::new("proxy.local", 0));

    assert!(matches!(
        settings.to_connection_config(),
        Err(HandshakeError::InvalidArgument(_))
    ));
}

#[test]
fn test_protocol_from_str() {
    assert_eq!("amqps".parse::<Protocol>().unwrap(), Protocol::Amqps);
    assert_eq!("AMQPS_WS".parse::<Protocol>().unwrap(), Protocol::AmqpsWs);
    assert_eq!("websocket".parse::<Protocol>().unwrap(), Protocol::AmqpsWs);
    assert!("mqtt".parse::<Protocol>().is_err());
}
