use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tkup::config::{Args, Config, ConfigFile, UpgradeOrder};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn test_load_sample_config() {
    let path = fixture("tkup.yaml");
    assert!(path.exists(), "Sample config not found at {:?}", path);

    let file = ConfigFile::load(&path).expect("Failed to load sample config");
    let upgrade = file.upgrade_config(None, None).expect("Sample config should be valid");

    assert_eq!(upgrade.talos.version, "v1.10.5");
    assert_eq!(upgrade.talos.order, UpgradeOrder::WorkersFirst);
    assert_eq!(upgrade.kubernetes.order, UpgradeOrder::ControlPlaneFirst);
    assert!(
        upgrade
            .talos
            .image_ref()
            .starts_with("factory.talos.dev/installer/")
    );
    assert!(upgrade.talos.image_ref().ends_with(":v1.10.5"));
}

#[test]
fn test_sample_config_timeouts() {
    let file = ConfigFile::load(fixture("tkup.yaml")).expect("Failed to load sample config");
    let timings = file.timings();

    assert_eq!(timings.health_timeout, Duration::from_secs(12 * 60));
    assert_eq!(timings.layer_stabilization, Duration::from_secs(90));
    assert_eq!(timings.talos_group_stabilization, Duration::from_secs(90));
    assert_eq!(timings.inter_node_delay, Duration::from_secs(30));
}

#[test]
fn test_config_from_args_applies_order_override() {
    let path = fixture("tkup.yaml");
    let args = Args::try_parse_from([
        "tkup",
        "--config",
        path.to_str().expect("fixture path is utf-8"),
        "--talos-upgrade-order",
        "control-plane-first",
        "--check-only",
    ])
    .expect("Failed to parse args");

    let config = Config::from_args(&args).expect("Failed to build config");

    assert_eq!(config.config_path, path);
    assert_eq!(config.upgrade.talos.order, UpgradeOrder::ControlPlaneFirst);
    assert!(config.check_only);
    assert!(!config.yes);
}

#[test]
fn test_config_from_args_missing_file() {
    let args = Args::try_parse_from(["tkup", "--config", "/nonexistent/tkup.yaml"])
        .expect("Failed to parse args");

    let err = Config::from_args(&args).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/tkup.yaml"));
}
