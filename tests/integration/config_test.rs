//! Configuration loading

use std::io::Write;
use tradegate::config::{Config, ExecutionMode, LogFormat, SizingMode};

#[test]
fn test_example_config_loads() {
    let config: Config = toml::from_str(include_str!("../../config.toml.example")).unwrap();

    assert_eq!(config.bot.execution_mode, ExecutionMode::SemiAuto);
    assert_eq!(config.bot.sizing_mode, SizingMode::FixedDollar);
    assert!(config.bot.validate().is_ok());
    assert_eq!(config.monitor.trading_days.len(), 5);
    assert_eq!(config.backtest.max_concurrent, 3);
    assert_eq!(config.telemetry.log_format, LogFormat::Pretty);
    assert!(config.telemetry.metrics_port.is_none());
}

#[test]
fn test_load_rejects_invalid_limits() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let content = include_str!("../../config.toml.example")
        .replace("max_drawdown_pct = 10", "max_drawdown_pct = 150");
    file.write_all(content.as_bytes()).unwrap();

    let err = tokio_test::assert_err!(Config::load(file.path()));
    assert!(err.to_string().contains("max_drawdown_pct"));
}
