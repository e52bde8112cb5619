//! In-process tar decoder used when no external `tar` is available.
//!
//! Only the subset of the ustar/GNU format that content packages use is
//! understood: regular files, directories and GNU long names. Other entry
//! types are skipped.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::util::{ensure_dir, is_safe_relative_path};
use crate::{Result, RigError};

const BLOCK_SIZE: usize = 512;

const TYPE_REGULAR: u8 = b'0';
const TYPE_REGULAR_OLD: u8 = 0;
const TYPE_CONTIGUOUS: u8 = b'7';
const TYPE_DIRECTORY: u8 = b'5';
const TYPE_GNU_LONG_NAME: u8 = b'L';

/// Read an archive into memory, gunzipping it first when `gzip` is set.
pub fn read_archive(archive_path: &Path, gzip: bool) -> Result<Vec<u8>> {
    let file = File::open(archive_path)
        .map_err(|e| RigError::fs("Failed to open archive", archive_path, e))?;
    let mut reader = BufReader::new(file);
    let mut data = Vec::new();

    let read = if gzip {
        GzDecoder::new(reader).read_to_end(&mut data)
    } else {
        reader.read_to_end(&mut data)
    };
    read.map_err(|e| RigError::extraction(archive_path, format!("failed to decompress: {}", e)))?;

    Ok(data)
}

/// Unpack raw tar bytes into `dest_dir`, returning the number of entries written.
pub fn unpack_tar(data: &[u8], dest_dir: &Path, archive_path: &Path) -> Result<usize> {
    let corrupt = |reason: String| RigError::extraction(archive_path, reason);

    let mut offset = 0;
    let mut zero_blocks = 0;
    let mut long_name: Option<String> = None;
    let mut written = 0;

    while offset + BLOCK_SIZE <= data.len() {
        let header = &data[offset..offset + BLOCK_SIZE];

        // Two consecutive zero blocks mark the end of the archive
        if header.iter().all(|&b| b == 0) {
            zero_blocks += 1;
            offset += BLOCK_SIZE;
            if zero_blocks == 2 {
                break;
            }
            continue;
        }
        zero_blocks = 0;

        let size = parse_size(&header[124..136])
            .ok_or_else(|| corrupt(format!("invalid size field at offset {}", offset)))?;
        let type_flag = header[156];

        let body_start = offset + BLOCK_SIZE;
        let body_end = body_start
            .checked_add(size)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| corrupt(format!("entry at offset {} runs past end of archive", offset)))?;
        let body = &data[body_start..body_end];

        let name = match long_name.take() {
            Some(name) => name,
            None => header_name(header),
        };

        match type_flag {
            TYPE_GNU_LONG_NAME => {
                long_name = Some(field_str(body));
            }
            TYPE_DIRECTORY => {
                if let Some(path) = entry_path(dest_dir, &name, archive_path)? {
                    ensure_dir(&path).map_err(|e| RigError::fs("Failed to create directory", &path, e))?;
                    written += 1;
                }
            }
            TYPE_REGULAR | TYPE_REGULAR_OLD | TYPE_CONTIGUOUS if name.ends_with('/') => {
                // Pre-POSIX archives mark directories with a trailing slash only
                if let Some(path) = entry_path(dest_dir, &name, archive_path)? {
                    ensure_dir(&path).map_err(|e| RigError::fs("Failed to create directory", &path, e))?;
                    written += 1;
                }
            }
            TYPE_REGULAR | TYPE_REGULAR_OLD | TYPE_CONTIGUOUS => {
                if let Some(path) = entry_path(dest_dir, &name, archive_path)? {
                    if let Some(parent) = path.parent() {
                        ensure_dir(parent)
                            .map_err(|e| RigError::fs("Failed to create directory", parent, e))?;
                    }
                    fs::write(&path, body).map_err(|e| RigError::fs("Failed to write", &path, e))?;
                    set_mode(&path, parse_octal(&header[100..108]));
                    written += 1;
                }
            }
            other => {
                log::debug!("Skipping tar entry {} with type {:?}", name, other as char);
            }
        }

        offset = body_start + padded(size);
    }

    Ok(written)
}

/// Round a size up to the next block boundary
fn padded(size: usize) -> usize {
    size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// NUL-terminated string field
fn field_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Entry name, joined with the ustar prefix field when present
fn header_name(header: &[u8]) -> String {
    let name = field_str(&header[0..100]);
    if &header[257..262] != b"ustar" {
        return name;
    }

    let prefix = field_str(&header[345..500]);
    if prefix.is_empty() {
        name
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), name)
    }
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let text = field_str(field);
    let text = text.trim_matches(|c: char| c == ' ' || c == '\0');
    if text.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(text, 8).ok()
}

/// Size field: octal text, or GNU base-256 when the high bit is set
fn parse_size(field: &[u8]) -> Option<usize> {
    if field[0] & 0x80 != 0 {
        let mut value: u64 = u64::from(field[0] & 0x7f);
        for &b in &field[1..] {
            value = value.checked_mul(256)?.checked_add(u64::from(b))?;
        }
        return usize::try_from(value).ok();
    }
    parse_octal(field).and_then(|v| usize::try_from(v).ok())
}

/// Resolve an entry name under `dest_dir`; `None` for entries that name the root itself.
fn entry_path(dest_dir: &Path, name: &str, archive_path: &Path) -> Result<Option<PathBuf>> {
    let relative = Path::new(name.trim_end_matches('/'));
    if !is_safe_relative_path(relative) {
        return Err(RigError::extraction(
            archive_path,
            format!("path traversal detected in archive entry {}", name),
        ));
    }

    let relative: PathBuf = relative.components().collect();
    if relative.as_os_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(dest_dir.join(relative)))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u64>) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode.filter(|m| *m != 0) {
        let mode = (mode & 0o777) as u32;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
            log::debug!("Could not set mode {:o} on {}: {}", mode, path.display(), e);
        }
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u64>) {}
