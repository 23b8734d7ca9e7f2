//! Unit tests for the config module
//!
//! Tests cover:
//! - Defaults
//! - TOML deserialization of every section
//! - Validation and the exit code it maps to

use steadfast::config::Config;
use steadfast::errors::{get_exit_code, EXIT_CONFIG_ERROR};
use steadfast::RecoveryStrategy;

mod default_tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_default_db_path_under_steadfast_dir() {
        let config = Config::default();
        assert!(config.store.path.ends_with(".steadfast/checkpoints.db"));
    }

    #[test]
    fn test_default_ttl_disabled() {
        assert!(Config::default().checkpoint.ttl_secs.is_none());
    }
}

mod toml_tests {
    use super::*;

    #[test]
    fn test_full_file() {
        let config: Config = toml::from_str(
            r#"
            [store]
            path = "/var/lib/agent/cp.db"
            busy_timeout_ms = 250

            [checkpoint]
            min_checkpoint_interval_ms = 1000
            compression_threshold_bytes = 4096
            compression_level = 9
            enable_diffs = false
            max_checkpoints_per_task = 20
            auto_prune = false
            ttl_secs = 86400
            action_interval = 5
            checkpoint_interval_ms = 30000
            sweep_interval_secs = 60

            [recovery]
            heartbeat_interval_ms = 2000
            dead_threshold = 4
            max_attempts = 5
            default_strategy = "restart"
            auto_recover = true

            [logging]
            filter = "steadfast=debug"
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.store.busy_timeout_ms, 250);
        assert_eq!(config.checkpoint.compression_level, 9);
        assert!(!config.checkpoint.enable_diffs);
        assert_eq!(config.checkpoint.ttl_secs, Some(86_400));
        assert_eq!(config.recovery.default_strategy, RecoveryStrategy::Restart);
        assert!(config.recovery.auto_recover);
        assert_eq!(config.logging.filter, "steadfast=debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.checkpoint.max_checkpoints_per_task, 50);
        assert_eq!(config.recovery.max_attempts, 3);
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result: Result<Config, _> = toml::from_str("[recovery]\ndefault_strategy = \"retry\"\n");
        assert!(result.is_err());
    }
}

mod validation_tests {
    use super::*;

    #[test]
    fn test_zero_max_checkpoints_rejected() {
        let mut config = Config::default();
        config.checkpoint.max_checkpoints_per_task = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_file_maps_to_config_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[recovery]\nmax_attempts = 0\n").unwrap();

        let err = Config::load(path.to_str()).unwrap_err();
        assert_eq!(get_exit_code(&err), EXIT_CONFIG_ERROR);
    }
}
