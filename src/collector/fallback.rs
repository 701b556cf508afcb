/**
 * ============================================================================
 * FALLBACK STORE MODULE
 * ============================================================================
 *
 * PURPOSE: Persist undeliverable events to local disk
 *
 * STORAGE STRUCTURE:
 * activity_log_fallback.jsonl          one JSON event per line, append-only
 * activity_log_fallback.jsonl.replay   claimed by a startup replay in progress
 *
 * FILE BEHAVIOR:
 * - Opened in append mode for every write, so a crash mid-write can at
 *   worst leave a torn final line, never damage earlier ones
 * - A torn final line gets its newline back before the next append, so
 *   later records are never glued onto it
 * - Lines that fail to parse during replay are kept, not discarded
 *
 * ============================================================================
 */

use crate::events::Event;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/**
 * Contents of a claimed replay file
 */
#[derive(Debug, Default)]
pub struct ReplayContents {
    pub events: Vec<Event>,
    pub malformed_lines: Vec<String>,
}

/**
 * Append-only NDJSON store for events the collector never received
 */
#[derive(Debug, Clone)]
pub struct FallbackStore {
    path: PathBuf,
}

impl FallbackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn replay_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".replay");
        PathBuf::from(name)
    }

    /**
     * Append events in order, one line each
     * Returns number of events written
     */
    pub fn append(&self, events: &[Event]) -> io::Result<usize> {
        let mut lines = Vec::with_capacity(events.len());
        for event in events {
            let line = serde_json::to_string(event)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            lines.push(line);
        }
        self.append_lines(&lines)?;
        Ok(events.len())
    }

    /**
     * Append raw, already-serialized lines
     * Used to put unparseable lines back after a replay
     */
    pub fn append_lines(&self, lines: &[String]) -> io::Result<()> {
        if lines.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        if ends_mid_line(&self.path)? {
            log::warn!("Fallback file {} ends in a torn line", self.path.display());
            writer.write_all(b"\n")?;
        }
        for line in lines {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    /**
     * Take ownership of the current fallback contents for replay
     *
     * The fallback file is renamed to the replay path so new failures keep
     * appending to a fresh file. A replay file left by an interrupted run is
     * reused, with any newer fallback lines appended to it.
     * Returns None when there is nothing to replay.
     */
    pub fn claim_for_replay(&self) -> io::Result<Option<PathBuf>> {
        let replay_path = self.replay_path();

        if replay_path.exists() {
            log::warn!(
                "Found unfinished replay file {}, resuming it",
                replay_path.display()
            );
            if self.path.exists() {
                let pending = fs::read(&self.path)?;
                let mut file = OpenOptions::new().append(true).open(&replay_path)?;
                if ends_mid_line(&replay_path)? {
                    file.write_all(b"\n")?;
                }
                file.write_all(&pending)?;
                file.sync_data()?;
                fs::remove_file(&self.path)?;
            }
            return Ok(Some(replay_path));
        }

        if !self.path.exists() {
            return Ok(None);
        }

        fs::rename(&self.path, &replay_path)?;
        Ok(Some(replay_path))
    }

    /**
     * Parse a claimed replay file
     */
    pub fn load_replay(replay_path: &Path) -> io::Result<ReplayContents> {
        let text = fs::read_to_string(replay_path)?;
        let mut contents = ReplayContents::default();

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(trimmed) {
                Ok(event) => contents.events.push(event),
                Err(e) => {
                    log::warn!("Unparseable fallback line kept for operator review: {}", e);
                    contents.malformed_lines.push(line.to_string());
                }
            }
        }

        Ok(contents)
    }

    /// Remove a replay file once everything in it has been handled.
    pub fn finish_replay(replay_path: &Path) -> io::Result<()> {
        match fs::remove_file(replay_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// True when the file is non-empty and its last byte is not a newline.
fn ends_mid_line(path: &Path) -> io::Result<bool> {
    let mut file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
