/*
 *  flavor/descriptor.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Cold metadata: the discovery stamp and the module descriptor
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

//! The discovery stamp is a small blob a plugin embeds in its
//! `rtapi-flavor` section:
//!
//! ```text
//! offset 0:  u32 api_version
//! offset 4:  u32 weight
//! offset 8:  u32 id
//! offset 12: u32 flags
//! offset 16: u32 magic
//! offset 20: NUL-terminated name (at most 20 bytes + NUL)
//! ```
//!
//! All integers are native-endian; the scanner only accepts objects
//! built for this process's word size and byte order.

use std::fmt;
use std::path::{Path, PathBuf};

use arrayvec::ArrayString;
use bitflags::bitflags;

use super::error::FlavorError;
use super::ffi::{RTFLAVOR_API_VERSION, RTFLAVOR_MAX_NAME_LEN, RTFLAVOR_STAMP_HEADER_SIZE};

/// Bounded flavor name
pub type FlavorName = ArrayString<RTFLAVOR_MAX_NAME_LEN>;

bitflags! {
    /// Capability flags stamped into a flavor module
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FlavorFlags: u32 {
        /// iopl() is needed for port IO
        const DOES_IO = 1 << 0;
        /// Hard realtime latency
        const IS_RT = 1 << 1;
        /// No CLOCK_MONOTONIC available to the time hooks
        const TIME_NO_CLOCK_MONOTONIC = 1 << 2;
        /// Tasks run outside RTAPI managed threads
        const NOT_RTAPI = 1 << 3;
    }
}

/// Why a stamp could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StampError {
    Truncated(usize),
    UnterminatedName,
    EmptyName,
    InvalidName,
}

impl fmt::Display for StampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StampError::Truncated(len) =>
                write!(f, "stamp truncated: {} bytes", len),
            StampError::UnterminatedName =>
                write!(f, "name is not NUL-terminated within {} bytes", RTFLAVOR_MAX_NAME_LEN + 1),
            StampError::EmptyName =>
                write!(f, "name is empty"),
            StampError::InvalidName =>
                write!(f, "name is not valid UTF-8"),
        }
    }
}

impl std::error::Error for StampError {}

/// Raw fields of a discovery stamp, before any semantic validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorStamp {
    pub api_version: u32,
    pub weight: u32,
    pub id: u32,
    pub flags: FlavorFlags,
    pub magic: u32,
    pub name: FlavorName,
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_ne_bytes(word)
}

impl FlavorStamp {
    /// Parse the raw section bytes
    ///
    /// Trailing bytes after the name's NUL (section padding) are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, StampError> {
        if bytes.len() < RTFLAVOR_STAMP_HEADER_SIZE + 1 {
            return Err(StampError::Truncated(bytes.len()));
        }

        let tail = &bytes[RTFLAVOR_STAMP_HEADER_SIZE..];
        let window = &tail[..tail.len().min(RTFLAVOR_MAX_NAME_LEN + 1)];
        let len = window.iter()
            .position(|&c| c == 0)
            .ok_or(StampError::UnterminatedName)?;

        if len == 0 {
            return Err(StampError::EmptyName);
        }

        let name = std::str::from_utf8(&window[..len])
            .map_err(|_| StampError::InvalidName)?;
        let name = FlavorName::from(name).map_err(|_| StampError::UnterminatedName)?;

        Ok(Self {
            api_version: read_u32(bytes, 0),
            weight: read_u32(bytes, 4),
            id: read_u32(bytes, 8),
            flags: FlavorFlags::from_bits_retain(read_u32(bytes, 12)),
            magic: read_u32(bytes, 16),
            name,
        })
    }

    /// Serialize back into the section layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RTFLAVOR_STAMP_HEADER_SIZE + self.name.len() + 1);
        out.extend_from_slice(&self.api_version.to_ne_bytes());
        out.extend_from_slice(&self.weight.to_ne_bytes());
        out.extend_from_slice(&self.id.to_ne_bytes());
        out.extend_from_slice(&self.flags.bits().to_ne_bytes());
        out.extend_from_slice(&self.magic.to_ne_bytes());
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        out
    }
}

/// A discovered, not yet loaded flavor module
///
/// Created by the scanner, owned by the candidate registry, immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub name: FlavorName,
    pub id: u32,
    pub weight: u32,
    pub magic: u32,
    pub flags: FlavorFlags,
    pub api_version: u32,
    pub path: PathBuf,
}

impl ModuleDescriptor {
    /// Validate a stamp found at `path`
    pub fn from_stamp(stamp: FlavorStamp, path: &Path) -> Result<Self, FlavorError> {
        if stamp.api_version != RTFLAVOR_API_VERSION {
            return Err(FlavorError::ContractViolation {
                flavor: stamp.name.to_string(),
                reason: format!(
                    "api_version {} is not supported (expected {})",
                    stamp.api_version, RTFLAVOR_API_VERSION
                ),
            });
        }

        if stamp.id == 0 {
            return Err(FlavorError::ContractViolation {
                flavor: stamp.name.to_string(),
                reason: "flavor id 0 is reserved".to_string(),
            });
        }

        Ok(Self {
            name: stamp.name,
            id: stamp.id,
            weight: stamp.weight,
            magic: stamp.magic,
            flags: stamp.flags,
            api_version: stamp.api_version,
            path: path.to_path_buf(),
        })
    }

    /// Case-insensitive name comparison
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id {}, weight {}, magic {}, flags {:#x}) at {}",
            self.name,
            self.id,
            self.weight,
            self.magic,
            self.flags.bits(),
            self.path.display()
        )
    }
}
