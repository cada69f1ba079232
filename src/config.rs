/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: config.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 09:55:48
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-19 08:41:27
 */

use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub db_url: String,
    pub db_name: String,
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    pub relay_host: String,
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,
    pub domain: String,
    pub log_file: Option<String>,
    pub log_level: Option<String>,
}

// Default listen endpoint for the ingress handler
fn default_listen_address() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    1025
}

// Default relay port is the plain SMTP port
fn default_relay_port() -> u16 {
    25
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
}

// Default config file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/amane/amane.conf";

impl AppConfig {
    /// Load config from the default path.
    pub fn new() -> Result<Self, ConfigError> {
        Self::new_from_file(DEFAULT_CONFIG_PATH)
    }

    /// Load config from a specific file path. The file is YAML; keys the
    /// deserializer does not recognize are ignored.
    pub fn new_from_file(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::new(path, FileFormat::Yaml).required(true))
            .build()?
            .try_deserialize()
    }

    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            host: self.relay_host.clone(),
            port: self.relay_port,
        }
    }
}
