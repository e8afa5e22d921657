use std::path::PathBuf;

use config::{Config, File, FileFormat};
use qot_common::error::{QotError, QotResult};

/// Node daemon configuration, merged from `/etc/qot/node.toml` with CLI
/// overrides (§6 CLI surface).
#[derive(Debug, Clone)]
pub struct Settings {
    pub socket_path: PathBuf,
    pub pub_host: String,
    pub redis_url: String,
}

fn config_err(e: config::ConfigError) -> QotError {
    QotError::InvalidArgument(format!("config error: {e}"))
}

impl Settings {
    pub fn read(config_path: Option<&str>) -> QotResult<Settings> {
        let mut builder = Config::builder()
            .set_default("socket_path", "/var/run/qot/timelined.sock")
            .map_err(config_err)?
            .set_default("pub_host", "127.0.0.1:6379")
            .map_err(config_err)?
            .set_default("redis_url", "redis://127.0.0.1:6379")
            .map_err(config_err)?;
        if let Some(path) = config_path {
            builder = builder.add_source(File::new(path, FileFormat::Toml).required(false));
        } else {
            builder = builder.add_source(File::new("/etc/qot/node.toml", FileFormat::Toml).required(false));
        }
        let config = builder.build().map_err(config_err)?;

        Ok(Settings {
            socket_path: PathBuf::from(config.get_string("socket_path").map_err(config_err)?),
            pub_host: config.get_string("pub_host").map_err(config_err)?,
            redis_url: config.get_string("redis_url").map_err(config_err)?,
        })
    }
}
