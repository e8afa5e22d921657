use std::time::Duration;

use config::{Config, File};

use qot_common::error::{QotError, QotResult};

/// Peer-sync server configuration (§6 CLI surface), merged from a TOML
/// file with CLI overrides, following the node daemon's own
/// `config`-crate idiom (`qot-node::settings::Settings`).
#[derive(Debug, Clone)]
pub struct Settings {
    pub nats_server: String,
    pub master_clock: String,
    pub period: Duration,
    pub graph_config_path: String,
}

fn config_err(e: config::ConfigError) -> QotError {
    QotError::InvalidArgument(format!("config error: {e}"))
}

impl Settings {
    pub fn read(config_path: Option<&str>) -> QotResult<Settings> {
        let builder = Config::builder()
            .set_default("nats_server", "redis://127.0.0.1:6379")
            .map_err(config_err)?
            .set_default("master_clock", "")
            .map_err(config_err)?
            .set_default("period", 1.0)
            .map_err(config_err)?
            .set_default("graph_config_path", "/etc/qot/peersync.json")
            .map_err(config_err)?
            .add_source(
                File::new(config_path.unwrap_or("/etc/qot/peersync.toml"), config::FileFormat::Toml)
                    .required(false),
            );
        let config = builder.build().map_err(config_err)?;

        let period_secs: f64 = config.get_float("period").map_err(config_err)?;
        if period_secs <= 0.0 {
            return Err(QotError::InvalidArgument(format!("period must be positive, got {period_secs}")));
        }

        Ok(Settings {
            nats_server: config.get_string("nats_server").map_err(config_err)?,
            master_clock: config.get_string("master_clock").map_err(config_err)?,
            period: Duration::from_secs_f64(period_secs),
            graph_config_path: config.get_string("graph_config_path").map_err(config_err)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_no_file_present() {
        let settings = Settings::read(Some("/nonexistent/peersync.toml")).unwrap();
        assert_eq!(settings.period, Duration::from_secs(1));
        assert_eq!(settings.graph_config_path, "/etc/qot/peersync.json");
    }

    #[test]
    fn zero_period_is_rejected() {
        let path = std::env::temp_dir().join("qot_peersync_settings_test_zero_period.toml");
        std::fs::write(&path, "period = 0.0\n").unwrap();
        let err = Settings::read(Some(path.to_str().unwrap())).unwrap_err();
        assert!(matches!(err, QotError::InvalidArgument(_)));
        std::fs::remove_file(&path).ok();
    }
}
