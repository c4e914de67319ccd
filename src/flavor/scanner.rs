/*
 *  flavor/scanner.rs
 *
 *  rtflavor - realtime flavor loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Module scanner - walks a directory tree looking for stamped flavor objects
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

//! Best-effort discovery pass
//!
//! Nothing in here is fatal: unreadable directories, foreign files and
//! malformed stamps only shrink the candidate set. The walk never
//! aborts on a sibling's failure.

use std::fs;
use std::path::Path;

use log::{debug, trace};
use walkdir::WalkDir;

use super::descriptor::FlavorStamp;
use super::elf;
use super::ffi::RTFLAVOR_STAMP_SECTION;

/// Probe a single file for a flavor stamp
pub fn probe_file(path: &Path) -> Option<FlavorStamp> {
    let bytes = elf::section_bytes(path, RTFLAVOR_STAMP_SECTION)?;

    match FlavorStamp::parse(&bytes) {
        Ok(stamp) => Some(stamp),
        Err(e) => {
            debug!("Ignoring malformed flavor stamp in {}: {}", path.display(), e);
            None
        }
    }
}

/// Walk `root` recursively, calling `found` for every stamped object
///
/// Directories are descended; regular files and symlinks to files are
/// probed under their canonical path. Symlinks to directories are not
/// followed, so a link cycle cannot recurse forever.
///
/// Returns the number of files visited, not the number of matches.
pub fn scan_tree<F>(root: &Path, found: &mut F) -> usize
where
    F: FnMut(&Path, FlavorStamp),
{
    let mut count = 0;

    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Cannot read flavor directory entry under {}: {}", root.display(), e);
                continue;
            }
        };

        let kind = entry.file_type();
        if kind.is_dir() {
            continue;
        }

        let node = entry.path();
        let real = match fs::canonicalize(node) {
            Ok(real) => real,
            Err(e) => {
                trace!("Cannot resolve {}: {}", node.display(), e);
                continue;
            }
        };

        if kind.is_file() || (kind.is_symlink() && real.is_file()) {
            count += 1;
            if let Some(stamp) = probe_file(&real) {
                trace!("Found flavor stamp '{}' in {}", stamp.name, real.display());
                found(&real, stamp);
            }
        } else {
            trace!("Skipping {}", node.display());
        }
    }

    count
}

#[cfg(all(test, target_pointer_width = "64"))]
mod tests {
    use super::*;
    use crate::flavor::descriptor::{FlavorFlags, FlavorName};
    use crate::flavor::elf::tests::shared_object;
    use crate::flavor::ffi::RTFLAVOR_API_VERSION;

    fn stamp_bytes(name: &str, id: u32) -> Vec<u8> {
        FlavorStamp {
            api_version: RTFLAVOR_API_VERSION,
            weight: 1,
            id,
            flags: FlavorFlags::empty(),
            magic: 1,
            name: FlavorName::from(name).unwrap(),
        }
        .to_bytes()
    }

    #[test]
    fn test_counts_files_not_matches() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README"), "not a flavor").unwrap();
        fs::write(dir.path().join("libposix.so"), shared_object(RTFLAVOR_STAMP_SECTION, &stamp_bytes("posix", 2))).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/librt.so"), shared_object(RTFLAVOR_STAMP_SECTION, &stamp_bytes("rt", 3))).unwrap();
        fs::write(dir.path().join("nested/libother.so"), shared_object(".rodata", b"x")).unwrap();

        let mut names = Vec::new();
        let visited = scan_tree(dir.path(), &mut |_path: &Path, stamp: FlavorStamp| {
            names.push(stamp.name.to_string());
        });

        names.sort();
        assert_eq!(visited, 4);
        assert_eq!(names, vec!["posix", "rt"]);
    }

    #[test]
    fn test_root_that_is_a_file_visits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let lone = dir.path().join("libposix.so");
        fs::write(&lone, shared_object(RTFLAVOR_STAMP_SECTION, &stamp_bytes("posix", 2))).unwrap();

        let mut hits = 0;
        assert_eq!(scan_tree(&lone, &mut |_: &Path, _: FlavorStamp| hits += 1), 0);
        assert_eq!(hits, 0);
    }

    #[test]
    fn test_deeply_nested_objects_are_found() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b/c");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("librt.so"), shared_object(RTFLAVOR_STAMP_SECTION, &stamp_bytes("rt", 3))).unwrap();

        let mut names = Vec::new();
        let visited = scan_tree(dir.path(), &mut |_: &Path, stamp: FlavorStamp| names.push(stamp.name.to_string()));
        assert_eq!(visited, 1);
        assert_eq!(names, vec!["rt"]);
    }

    #[test]
    fn test_missing_directory_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut hits = 0;
        let visited = scan_tree(&dir.path().join("nope"), &mut |_: &Path, _: FlavorStamp| hits += 1);
        assert_eq!(visited, 0);
        assert_eq!(hits, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_resolve_to_canonical_path() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("libposix.so.1");
        fs::write(&real, shared_object(RTFLAVOR_STAMP_SECTION, &stamp_bytes("posix", 2))).unwrap();
        std::os::unix::fs::symlink(&real, dir.path().join("libposix.so")).unwrap();
        // Directory loop must not recurse
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();

        let mut paths = Vec::new();
        scan_tree(dir.path(), &mut |path: &Path, _: FlavorStamp| paths.push(path.to_path_buf()));

        let canonical = fs::canonicalize(&real).unwrap();
        assert_eq!(paths, vec![canonical.clone(), canonical]);
    }
}
