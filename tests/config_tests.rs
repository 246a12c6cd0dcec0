//! Integration tests for configuration loading and validation.

use wharfgate::error::Error;
use wharfgate::Config;

const VALID_YAML: &str = r#"
host: 0.0.0.0
port: 7878
dockerd:
  host: 127.0.0.1
  port: 2375
  admin: admin
  password: secret
harbor:
  host: harbor.local
  protocol: https
npm_registry:
  namespace: npm
  base_image: verdaccio/verdaccio
  base_image_tag: "5"
pip_registry:
  namespace: pip
"#;

fn write_config(yaml: &str) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), yaml).unwrap();
    file
}

#[test]
fn test_load_valid_config() {
    let file = write_config(VALID_YAML);
    let config = Config::load(file.path()).unwrap();

    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 7878);
    assert_eq!(config.dockerd.host, "127.0.0.1");
    assert_eq!(config.harbor.protocol, "https");
    assert_eq!(config.npm_registry.base_image, "verdaccio/verdaccio");
    assert_eq!(config.pip_registry.namespace, "pip");
}

#[test]
fn test_endpoint_helpers() {
    let file = write_config(VALID_YAML);
    let config = Config::load(file.path()).unwrap();

    assert_eq!(
        config.dockerd_endpoint(),
        Some("tcp://127.0.0.1:2375".to_string())
    );
    assert_eq!(config.registry_api(), "https://harbor.local/api");
    assert_eq!(config.harbor_target(), "https://harbor.local");
}

#[test]
fn test_zero_dockerd_port_means_local_socket() {
    let yaml = VALID_YAML.replace("port: 2375", "port: 0");
    let file = write_config(&yaml);
    let config = Config::load(file.path()).unwrap();

    assert_eq!(config.dockerd_endpoint(), None);
}

#[test]
fn test_missing_file_is_load_error() {
    let err = Config::load("/nonexistent/config.yaml").unwrap_err();
    assert!(matches!(err, Error::ConfigLoad { .. }));
}

#[test]
fn test_reserved_port_rejected() {
    let yaml = VALID_YAML.replace("port: 7878", "port: 80");
    let file = write_config(&yaml);

    let err = Config::load(file.path()).unwrap_err();
    assert!(matches!(err, Error::ConfigInvalid { field: "port", .. }));
}

#[test]
fn test_unknown_protocol_rejected() {
    let yaml = VALID_YAML.replace("protocol: https", "protocol: ftp");
    let file = write_config(&yaml);

    let err = Config::load(file.path()).unwrap_err();
    assert!(matches!(
        err,
        Error::ConfigInvalid {
            field: "harbor.protocol",
            ..
        }
    ));
}

#[test]
fn test_missing_npm_base_image_rejected() {
    let yaml = VALID_YAML.replace("  base_image: verdaccio/verdaccio\n", "");
    let file = write_config(&yaml);

    // Missing required field fails at deserialization.
    let err = Config::load(file.path()).unwrap_err();
    assert!(matches!(err, Error::ConfigLoad { .. }));
}

#[test]
fn test_empty_pip_namespace_rejected() {
    let yaml = VALID_YAML.replace("namespace: pip", "namespace: \"\"");
    let file = write_config(&yaml);

    let err = Config::load(file.path()).unwrap_err();
    assert!(matches!(
        err,
        Error::ConfigInvalid {
            field: "pip_registry.namespace",
            ..
        }
    ));
}

#[test]
fn test_empty_host_rejected() {
    let yaml = VALID_YAML.replace("host: 0.0.0.0", "host: \"\"");
    let file = write_config(&yaml);

    let err = Config::load(file.path()).unwrap_err();
    assert!(matches!(err, Error::ConfigInvalid { field: "host", .. }));
}
