/**
 * ============================================================================
 * HOSTS FILE MODULE
 * ============================================================================
 *
 * PURPOSE: Own one marker-bounded region of the hosts file
 *
 * FILE LAYOUT:
 *   ...operator entries, untouched...
 *   # SPIEGO_BLOCK_START
 *   127.0.0.1 a.com
 *   127.0.0.1 b.com
 *   # SPIEGO_BLOCK_END
 *   ...operator entries, untouched...
 *
 * WRITE SEQUENCE:
 * 1. Copy the current content to <hosts>.spiego.<UTC timestamp>.bak
 *    (a failed backup is logged and the update goes ahead; content equal to
 *    the newest backup is not copied again, so retries keep older backups)
 * 2. Write the new content to <hosts>.spiego.tmp and sync it
 * 3. Rename the temp file over the hosts file
 *
 * ============================================================================
 */

use chrono::{DateTime, Utc};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const START_MARKER: &str = "# SPIEGO_BLOCK_START";
pub const END_MARKER: &str = "# SPIEGO_BLOCK_END";

/// Timestamped backups kept next to the hosts file.
const MAX_BACKUPS: usize = 5;

#[derive(Debug, Error)]
pub enum HostsError {
    #[error("hosts file I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("block region start marker has no end marker; refusing to edit")]
    UnterminatedRegion,
}

impl HostsError {
    /// Whether retrying the same write could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, HostsError::Io(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// File rewritten; carries the backup path if one was made.
    Written { backup: Option<PathBuf> },
    /// Content was already as requested.
    Unchanged,
}

/**
 * Render the marker block, without a trailing newline
 */
pub fn render_section(domains: &[String], address: &str) -> String {
    let mut lines = Vec::with_capacity(domains.len() + 2);
    lines.push(START_MARKER.to_string());
    for domain in domains {
        lines.push(format!("{} {}", address, domain));
    }
    lines.push(END_MARKER.to_string());
    lines.join("\n")
}

/**
 * Splice `section` into `original`
 *
 * Replaces the existing region in place, or appends a new one after a blank
 * line. An empty list with no existing region leaves the content as is.
 */
pub fn apply_region(
    original: &str,
    domains: &[String],
    address: &str,
) -> Result<String, HostsError> {
    let section = render_section(domains, address);

    if let Some(start) = find_marker_line(original, 0, START_MARKER) {
        let end = find_marker_line(original, start + START_MARKER.len(), END_MARKER)
            .map(|offset| offset + END_MARKER.len())
            .ok_or(HostsError::UnterminatedRegion)?;

        let mut content = String::with_capacity(original.len() + section.len());
        content.push_str(&original[..start]);
        content.push_str(&section);
        content.push_str(&original[end..]);
        return Ok(content);
    }

    if domains.is_empty() {
        return Ok(original.to_string());
    }

    let mut content = String::with_capacity(original.len() + section.len() + 3);
    if !original.is_empty() {
        content.push_str(original);
        if !original.ends_with('\n') {
            content.push('\n');
        }
        content.push('\n');
    }
    content.push_str(&section);
    content.push('\n');
    Ok(content)
}

/**
 * Byte offset of the first line at or after `from` that is exactly `marker`
 * Trailing whitespace (including a CR) is ignored; anything else on the
 * line means it is an operator comment, not a marker.
 */
fn find_marker_line(text: &str, from: usize, marker: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        if line_start >= from && line.trim_end() == marker {
            return Some(line_start);
        }
    }
    None
}

pub fn backup_path(hosts_path: &Path, now: DateTime<Utc>) -> PathBuf {
    sibling(hosts_path, &format!(".spiego.{}.bak", now.format("%Y%m%dT%H%M%SZ")))
}

fn temp_path(hosts_path: &Path) -> PathBuf {
    sibling(hosts_path, ".spiego.tmp")
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/**
 * Replace `path` with `content` via temp file and rename
 * The temp file inherits the permissions of the file it replaces.
 */
pub fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    let tmp = temp_path(path);
    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);

        if let Ok(metadata) = fs::metadata(path) {
            fs::set_permissions(&tmp, metadata.permissions())?;
        }
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn read_hosts(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn write_backup(hosts_path: &Path, original: &str, now: DateTime<Utc>) -> Option<PathBuf> {
    if let Some(newest) = list_backups(hosts_path).pop() {
        if fs::read_to_string(&newest).is_ok_and(|saved| saved == original) {
            log::debug!("Hosts content already backed up in {}", newest.display());
            return Some(newest);
        }
    }

    let backup = backup_path(hosts_path, now);
    match fs::write(&backup, original) {
        Ok(()) => {
            prune_backups(hosts_path, MAX_BACKUPS);
            Some(backup)
        }
        Err(e) => {
            log::warn!("Hosts backup {} failed: {}", backup.display(), e);
            None
        }
    }
}

/// Timestamped backups of `hosts_path`, oldest first.
fn list_backups(hosts_path: &Path) -> Vec<PathBuf> {
    let (Some(dir), Some(name)) = (hosts_path.parent(), hosts_path.file_name()) else {
        return Vec::new();
    };
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
    let prefix = format!("{}.spiego.", name.to_string_lossy());

    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut backups: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .map(|n| n.to_string_lossy())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".bak"))
        })
        .collect();

    // Timestamps sort lexically
    backups.sort();
    backups
}

/// Delete all but the newest `keep` timestamped backups.
fn prune_backups(hosts_path: &Path, keep: usize) {
    let backups = list_backups(hosts_path);
    let excess = backups.len().saturating_sub(keep);
    for old in backups.into_iter().take(excess) {
        if let Err(e) = fs::remove_file(&old) {
            log::debug!("Could not prune {}: {}", old.display(), e);
        }
    }
}

/**
 * Make the hosts file's marker region list exactly `domains`
 */
pub fn apply_block_list(
    hosts_path: &Path,
    domains: &[String],
    address: &str,
) -> Result<ApplyOutcome, HostsError> {
    let existing = read_hosts(hosts_path)?;
    let original = existing.as_deref().unwrap_or("");
    let updated = apply_region(original, domains, address)?;

    if updated == original {
        return Ok(ApplyOutcome::Unchanged);
    }

    let backup = existing
        .as_deref()
        .and_then(|text| write_backup(hosts_path, text, Utc::now()));

    log::info!(
        "Writing {} blocked domain(s) to {}",
        domains.len(),
        hosts_path.display()
    );
    write_atomic(hosts_path, &updated)?;
    Ok(ApplyOutcome::Written { backup })
}
