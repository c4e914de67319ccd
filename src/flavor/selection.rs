/*
 *  flavor/selection.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Flavor selection input - command line and environment
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

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::debug;

use super::descriptor::FlavorName;
use super::error::FlavorError;
use super::ffi::RTFLAVOR_MAX_NAME_LEN;

/// Environment variable carrying a flavor selector
pub const FLAVOR_ENV: &str = "FLAVOR";

/// What the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlavorSelector {
    /// Canonical path of a flavor object
    Path(PathBuf),
    /// Stamped flavor id (never 0)
    Id(u32),
    /// Case-insensitive flavor name
    Name(FlavorName),
}

impl fmt::Display for FlavorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlavorSelector::Path(path) => write!(f, "path '{}'", path.display()),
            FlavorSelector::Id(id) => write!(f, "id {}", id),
            FlavorSelector::Name(name) => write!(f, "name '{}'", name),
        }
    }
}

/// Whether `path` names something this process can read
fn is_readable(path: &Path) -> bool {
    if path.is_dir() {
        fs::read_dir(path).is_ok()
    } else {
        File::open(path).is_ok()
    }
}

/// Interpret one selector string
///
/// Digits with an optional sign is an id; a readable file or directory
/// is a path; anything else is a name. A leading `=` (left over from `-f=ident`) is ignored.
pub fn parse_selector(input: &str) -> Result<FlavorSelector, FlavorError> {
    let input = input.strip_prefix('=').unwrap_or(input);

    if input.is_empty() {
        return Err(FlavorError::AmbiguousInput("empty flavor selector".to_string()));
    }

    let digits = input.strip_prefix('-').unwrap_or(input);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        if input.starts_with('-') {
            return Err(FlavorError::AmbiguousInput(format!(
                "negative flavor id {}",
                input
            )));
        }

        let id = input.parse::<u32>().map_err(|_| {
            FlavorError::AmbiguousInput(format!("flavor id {} is out of range", input))
        })?;

        if id == 0 {
            return Err(FlavorError::AmbiguousInput("flavor id 0 is not valid".to_string()));
        }

        debug!("Flavor selector is id {}", id);
        return Ok(FlavorSelector::Id(id));
    }

    let candidate = Path::new(input);
    if is_readable(candidate) {
        let real = fs::canonicalize(candidate).map_err(|e| {
            FlavorError::AmbiguousInput(format!("cannot resolve flavor path {}: {}", input, e))
        })?;
        debug!("Flavor selector is path {}", real.display());
        return Ok(FlavorSelector::Path(real));
    }

    let name = FlavorName::from(input).map_err(|_| {
        FlavorError::AmbiguousInput(format!(
            "flavor name '{}' is longer than {} bytes",
            input,
            RTFLAVOR_MAX_NAME_LEN
        ))
    })?;

    debug!("Flavor selector is name '{}'", name);
    Ok(FlavorSelector::Name(name))
}

/// Raw selector inputs gathered at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSources {
    /// Every `--flavor` value seen on the command line, in order
    pub cmdline: Vec<String>,
    /// Value of the `FLAVOR` environment variable
    pub environment: Option<String>,
}

impl SelectionSources {
    /// Command line values plus the process environment
    pub fn from_env(cmdline: Vec<String>) -> Self {
        Self {
            cmdline,
            environment: std::env::var(FLAVOR_ENV).ok(),
        }
    }

    /// Reduce the inputs to at most one selector
    ///
    /// `None` means automatic selection. Two sources at once, or the
    /// option given twice, is refused rather than prioritised.
    pub fn resolve(&self) -> Result<Option<FlavorSelector>, FlavorError> {
        if self.cmdline.len() > 1 {
            return Err(FlavorError::AmbiguousInput(format!(
                "flavor option given {} times",
                self.cmdline.len()
            )));
        }

        match (self.cmdline.first(), self.environment.as_deref()) {
            (Some(cmd), Some(env)) => Err(FlavorError::AmbiguousInput(format!(
                "flavor selected both on the command line ('{}') and in {} ('{}')",
                cmd, FLAVOR_ENV, env
            ))),
            (Some(cmd), None) => parse_selector(cmd).map(Some),
            (None, Some(env)) => parse_selector(env).map(Some),
            (None, None) => Ok(None),
        }
    }
}
