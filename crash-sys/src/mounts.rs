// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SysError};

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// All mount points currently listed in the process mount table
pub fn mount_points() -> Result<BTreeSet<PathBuf>> {
    let mount_info = fs::read_to_string(MOUNTINFO)?;
    parse_mount_points(&mount_info)
}

/// Returns true if `path` is listed as a mount point
///
/// The path is canonicalized first so symlinked media roots still match;
/// a path that cannot be resolved is compared verbatim.
pub fn is_mount_point(path: &Path) -> Result<bool> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let mounted = mount_points()?.contains(&canonical);
    debug!("Mount point {} mounted={}", canonical.display(), mounted);
    Ok(mounted)
}

pub fn parse_mount_points(input: &str) -> Result<BTreeSet<PathBuf>> {
    let mut points = BTreeSet::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let (left, _right) = line
            .split_once(" - ")
            .ok_or_else(|| SysError::InvalidMountInfoLine(line.to_string()))?;

        let mount_point = left
            .split_whitespace()
            .nth(4)
            .ok_or_else(|| SysError::InvalidMountInfoLine(line.to_string()))?;

        points.insert(decode_mount_field(mount_point));
    }

    Ok(points)
}

/// Decode the octal escapes (`\040` for space) the kernel uses in mountinfo
///
/// Works on raw bytes: mount points are not necessarily valid UTF-8.
fn decode_mount_field(field: &str) -> PathBuf {
    let raw = field.as_bytes();
    let mut decoded = Vec::with_capacity(raw.len());
    let mut rest = raw;

    while let Some((&byte, tail)) = rest.split_first() {
        let escaped = match tail {
            [a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7', ..] if byte == b'\\' => {
                Some(((a - b'0') << 6) | ((b - b'0') << 3) | (c - b'0'))
            }
            _ => None,
        };

        match escaped {
            Some(value) => {
                decoded.push(value);
                rest = &tail[3..];
            }
            None => {
                decoded.push(byte);
                rest = tail;
            }
        }
    }

    PathBuf::from(OsString::from_vec(decoded))
}
