/*
 *  config.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  YAML configuration layered under environment and command line overrides
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

use crate::flavor::{DEFAULT_FLAVOR_LIB_DIR, FLAVOR_LIB_DIR_ENV};

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
///
/// The flavor selector is deliberately absent: it comes from the command
/// line or the `FLAVOR` environment variable only.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    pub log_level: Option<String>,       // e.g., "info" | "debug"
    pub flavor_lib_dir: Option<PathBuf>, // root scanned for flavor modules
}

impl Config {
    /// Effective scan root
    pub fn lib_dir(&self) -> PathBuf {
        self.flavor_lib_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FLAVOR_LIB_DIR))
    }

    /// Effective log filter
    pub fn log_filter(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "rtflavor", version, about = "Realtime flavor loader")]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// Flavor to install: a path, a numeric id or a name
    #[arg(short = 'f', long = "flavor", action = ArgAction::Append)]
    pub flavor: Vec<String>,
    /// Directory scanned for flavor modules
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub flavor_lib_dir: Option<PathBuf>,
    /// list discovered flavor modules and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub list: bool,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Public entry point: read YAML, merge env and CLI, validate.
pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) environment, then CLI (highest precedence)
    apply_env_overrides(&mut cfg, std::env::var_os(FLAVOR_LIB_DIR_ENV));
    apply_cli_overrides(&mut cfg, cli);

    // 4) Validate
    validate(&cfg)?;

    Ok(cfg)
}

/// Pretty YAML of the effective config
pub fn dump(cfg: &Config) -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(cfg)?)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/rtflavor/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/rtflavor/config.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    let p = PathBuf::from("rtflavor.yaml");
    if p.exists() { return Some(p) }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    if src.log_level.is_some()      { dst.log_level = src.log_level; }
    if src.flavor_lib_dir.is_some() { dst.flavor_lib_dir = src.flavor_lib_dir; }
}

fn apply_env_overrides(cfg: &mut Config, lib_dir: Option<OsString>) {
    if let Some(dir) = lib_dir.filter(|d| !d.is_empty()) {
        cfg.flavor_lib_dir = Some(PathBuf::from(dir));
    }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some()      { cfg.log_level = cli.log_level.clone(); }
    if cli.flavor_lib_dir.is_some() { cfg.flavor_lib_dir = cli.flavor_lib_dir.clone(); }
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(level) = cfg.log_level.as_deref() {
        match level.to_ascii_lowercase().as_str() {
            "off" | "error" | "warn" | "info" | "debug" | "trace" => {},
            _ => return Err(ConfigError::Validation(format!(
                "log_level must be off|error|warn|info|debug|trace, got '{}'", level
            ))),
        }
    }
    if let Some(dir) = cfg.flavor_lib_dir.as_ref() {
        if dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("flavor_lib_dir must not be empty".into()));
        }
    }
    Ok(())
}
