//! Offline finalization of retrieved session logs
//!
//! Capture never knows when a session is final, so the track length field is
//! written as zero. Once the card has been read back, each file gets:
//!
//! - any half-written trailing record (power lost mid-append) cut off
//! - an End-of-Track event, unless one is already there
//! - the real track length, `file size - 22`, patched into bytes 18..22
//!
//! Running it twice changes nothing the second time.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::smf::{self, TrackEvent, END_OF_TRACK, PREFIX_LEN, TRACK_LENGTH_OFFSET};
use crate::{LogError, Result};

/// What happened to one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Patched {
        track_length: u32,
        /// Bytes of a partial trailing record that were removed
        trimmed: usize,
        end_of_track_added: bool,
    },
    /// Too short to hold a header; left untouched
    Skipped,
}

#[derive(Debug)]
pub struct FinalizeReport {
    pub path: PathBuf,
    pub outcome: Result<FinalizeOutcome>,
}

/// Finalize one session file in place
pub fn finalize_file(path: &Path) -> Result<FinalizeOutcome> {
    let bytes = fs::read(path)?;
    if bytes.len() < PREFIX_LEN {
        return Ok(FinalizeOutcome::Skipped);
    }
    smf::parse_prefix(&bytes)?;

    let scan = smf::scan_track(&bytes[PREFIX_LEN..])?;
    let keep = PREFIX_LEN + scan.complete_len;
    let trimmed = bytes.len() - keep;
    let terminated = matches!(
        scan.records.last().map(|r| &r.event),
        Some(TrackEvent::EndOfTrack)
    );

    let final_len = keep + if terminated { 0 } else { END_OF_TRACK.len() };
    let track_length =
        u32::try_from(final_len - PREFIX_LEN).map_err(|_| LogError::BadHeader)?;

    let mut file = OpenOptions::new().write(true).open(path)?;
    if trimmed > 0 {
        file.set_len(keep as u64)?;
    }
    if !terminated {
        file.seek(SeekFrom::Start(keep as u64))?;
        file.write_all(&END_OF_TRACK)?;
    }
    file.seek(SeekFrom::Start(TRACK_LENGTH_OFFSET as u64))?;
    file.write_all(&track_length.to_be_bytes())?;
    file.sync_all()?;

    Ok(FinalizeOutcome::Patched {
        track_length,
        trimmed,
        end_of_track_added: !terminated,
    })
}

/// Finalize every `.MID` file directly inside `dir`, in name order
pub fn finalize_dir(dir: &Path) -> Result<Vec<FinalizeReport>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_session_file(path))
        .collect();
    paths.sort();

    let reports = paths
        .into_iter()
        .map(|path| {
            let outcome = finalize_file(&path);
            match &outcome {
                Ok(FinalizeOutcome::Patched { track_length, .. }) => {
                    info!("Updated {} track length to {} bytes", path.display(), track_length)
                }
                Ok(FinalizeOutcome::Skipped) => {
                    warn!("Skipped {}: shorter than a header", path.display())
                }
                Err(e) => warn!("Could not finalize {}: {}", path.display(), e),
            }
            FinalizeReport { path, outcome }
        })
        .collect();

    Ok(reports)
}

fn is_session_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.to_ascii_uppercase().contains(".MID"))
}
