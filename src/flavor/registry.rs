/*
 *  flavor/registry.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Candidate registry - discovered flavor modules waiting to be installed
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

use std::path::Path;

use log::{debug, error, info};

use super::descriptor::{FlavorStamp, ModuleDescriptor};
use super::scanner;

/// Result of offering a descriptor to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New candidate
    Inserted,
    /// Same object reached through another link; dropped silently
    Alias,
    /// Same name or id at a different path; rejected
    Conflict,
}

/// Discovered flavor modules, unique by name (case-insensitive) and by id
///
/// Populated from disk at most once per registry; later discovery
/// requests report the known count without touching the filesystem.
#[derive(Debug, Default)]
pub struct CandidateRegistry {
    entries: Vec<ModuleDescriptor>,
    discovered: bool,
}

impl CandidateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate
    pub fn insert(&mut self, candidate: ModuleDescriptor) -> InsertOutcome {
        let clash = self.entries.iter().find(|known| {
            known.name_matches(&candidate.name) || known.id == candidate.id
        });

        if let Some(known) = clash {
            if known.path == candidate.path {
                debug!("Flavor '{}' already known from {}", candidate.name, candidate.path.display());
                return InsertOutcome::Alias;
            }

            error!(
                "Two flavor modules collide on name or id: '{}' (id {}) at {} and '{}' (id {}) at {}",
                known.name, known.id, known.path.display(),
                candidate.name, candidate.id, candidate.path.display()
            );
            return InsertOutcome::Conflict;
        }

        self.entries.push(candidate);
        InsertOutcome::Inserted
    }

    /// Validate and offer a stamp found by the scanner
    fn offer(&mut self, path: &Path, stamp: FlavorStamp) {
        match ModuleDescriptor::from_stamp(stamp, path) {
            Ok(descriptor) => {
                self.insert(descriptor);
            }
            Err(e) => debug!("Skipping {}: {}", path.display(), e),
        }
    }

    /// Populate from `root` once; returns the number of known candidates
    pub fn discover_once(&mut self, root: &Path) -> usize {
        if self.discovered {
            return self.entries.len();
        }

        let visited = scanner::scan_tree(root, &mut |path: &Path, stamp: FlavorStamp| {
            self.offer(path, stamp)
        });
        self.discovered = true;

        info!(
            "Flavor discovery in {}: {} files visited, {} candidates",
            root.display(),
            visited,
            self.entries.len()
        );

        self.entries.len()
    }

    /// Probe a single file and return its entry if it is (now) known
    ///
    /// Used for explicit path selection, where the file may lie outside
    /// the scan root.
    pub fn probe_path(&mut self, path: &Path) -> Option<&ModuleDescriptor> {
        let real = std::fs::canonicalize(path).ok()?;

        if let Some(stamp) = scanner::probe_file(&real) {
            self.offer(&real, stamp);
        }

        self.find_by_path(&real)
    }

    pub fn is_discovered(&self) -> bool {
        self.discovered
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.entries.iter()
    }

    /// Case-insensitive exact name match
    pub fn find_by_name(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.entries.iter().find(|d| d.name_matches(name))
    }

    pub fn find_by_id(&self, id: u32) -> Option<&ModuleDescriptor> {
        self.entries.iter().find(|d| d.id == id)
    }

    /// Exact match on the canonical path
    pub fn find_by_path(&self, path: &Path) -> Option<&ModuleDescriptor> {
        self.entries.iter().find(|d| d.path == path)
    }

    /// Candidates ordered for automatic selection, heaviest first
    ///
    /// Stable: equal weights keep discovery order.
    pub fn sorted_by_weight_descending(&self) -> Vec<&ModuleDescriptor> {
        let mut sorted: Vec<&ModuleDescriptor> = self.entries.iter().collect();
        sorted.sort_by(|a, b| b.weight.cmp(&a.weight));
        sorted
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|d| d.name.to_string()).collect()
    }
}
