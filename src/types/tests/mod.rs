use super::*;
use crate::error::ListenError;
use std::time::Duration;

// --- config.rs tests ---

#[test]
fn test_config_defaults() {
    let config = SessionConfig::default();

    assert_eq!(config.control_port, 8060);
    assert_eq!(config.data_port, 6970);
    assert_eq!(config.report_port, 5150);
    assert_eq!(config.payload_type, 97);
    assert!((config.bandwidth - 10_000.0).abs() < f64::EPSILON);
    assert_eq!(config.rtcp_min_time, Duration::from_secs(5));
    assert_eq!(config.bandwidth_mode, BandwidthMode::Fresh);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_builder() {
    let config = SessionConfig::builder()
        .data_port(7000)
        .report_port(7001)
        .decoder_port(7002)
        .payload_type(96)
        .bandwidth(64_000.0)
        .rtcp_min_time(Duration::from_millis(200))
        .bandwidth_mode(BandwidthMode::Cumulative)
        .cname("me@box")
        .build();

    assert_eq!(config.data_port, 7000);
    assert_eq!(config.report_port, 7001);
    assert_eq!(config.decoder_port, 7002);
    assert_eq!(config.payload_type, 96);
    assert_eq!(config.rtcp_min_time, Duration::from_millis(200));
    assert_eq!(config.bandwidth_mode, BandwidthMode::Cumulative);
    assert_eq!(config.cname(), "me@box");
}

#[test]
fn test_config_rejects_non_positive_bandwidth() {
    for bandwidth in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        let config = SessionConfig::builder().bandwidth(bandwidth).build();
        assert!(
            matches!(config.validate(), Err(ListenError::InvalidConfig { .. })),
            "bandwidth {bandwidth} should be rejected"
        );
    }
}

#[test]
fn test_config_rejects_colliding_ports() {
    let config = SessionConfig::builder()
        .data_port(5150)
        .report_port(5150)
        .build();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("data_port and report_port"));

    let config = SessionConfig::builder().report_port(8060).build();
    assert!(config.validate().is_err());

    let config = SessionConfig::builder()
        .local_report_port(6980)
        .build();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_ephemeral_ports_never_collide() {
    let config = SessionConfig::builder()
        .data_port(0)
        .local_report_port(0)
        .decoder_port(0)
        .build();
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_rejects_wide_payload_type() {
    let config = SessionConfig::builder().payload_type(200).build();
    assert!(config.validate().is_err());
}

#[test]
fn test_default_cname_has_user_and_host() {
    let cname = SessionConfig::default().cname();
    let (user, host) = cname.split_once('@').unwrap();
    assert!(!user.is_empty());
    assert!(!host.is_empty());
}

#[test]
fn test_config_serde() {
    let config = SessionConfig::builder().data_port(7100).build();
    let json = serde_json::to_string(&config).unwrap();
    let back: SessionConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.data_port, 7100);
    assert_eq!(back.decoder, DecoderCommand::default());
}

// --- diagnostics.rs tests ---

#[test]
fn test_diagnostics_shared_between_clones() {
    let diag = Diagnostics::default();
    let clone = diag.clone();
    assert!(!clone.is_verbose());

    diag.set_verbose(true);
    assert!(clone.is_verbose());
}
