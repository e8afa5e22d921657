/*
BSD 2-Clause License

Copyright (c) 2022, Diagnosis and Control of Clouds Laboratory
All rights reserved.

Redistribution and use in source and binary forms, with or without
modification, are permitted provided that the following conditions are met:

1. Redistributions of source code must retain the above copyright notice, this
   list of conditions and the following disclaimer.

2. Redistributions in binary form must reproduce the above copyright notice,
   this list of conditions and the following disclaimer in the documentation
   and/or other materials provided with the distribution.

THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
*/

use config::{Config, File};

use qot_common::error::{QotError, QotResult};

#[derive(Debug, Clone)]
pub struct Settings {
    pub http_address: String,
    pub zk_hosts: String,
    pub pub_host: String,
    pub coordinator_group: String,
}

fn config_err(e: config::ConfigError) -> QotError {
    QotError::InvalidArgument(format!("config error: {e}"))
}

impl Settings {
    pub fn read(config_path: Option<&str>) -> QotResult<Settings> {
        let builder = Config::builder()
            .set_default("http_address", "0.0.0.0:8080")
            .map_err(config_err)?
            .set_default("zk_hosts", "redis://127.0.0.1:6379")
            .map_err(config_err)?
            .set_default("pub_host", "redis://127.0.0.1:6379")
            .map_err(config_err)?
            .set_default("coordinator_group", "qot-coordinators")
            .map_err(config_err)?
            .add_source(
                File::new(config_path.unwrap_or("/etc/qot/coordinator.toml"), config::FileFormat::Toml)
                    .required(false),
            );
        let config = builder.build().map_err(config_err)?;

        Ok(Settings {
            http_address: config.get_string("http_address").map_err(config_err)?,
            zk_hosts: config.get_string("zk_hosts").map_err(config_err)?,
            pub_host: config.get_string("pub_host").map_err(config_err)?,
            coordinator_group: config.get_string("coordinator_group").map_err(config_err)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_no_file_present() {
        let settings = Settings::read(Some("/nonexistent/coordinator.toml")).unwrap();
        assert_eq!(settings.http_address, "0.0.0.0:8080");
        assert_eq!(settings.coordinator_group, "qot-coordinators");
    }
}
