use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

pub const AUDIO_EXTENSIONS: [&str; 3] = ["mp3", "wav", "flac"];

pub fn has_audio_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Why a source file must be left alone, if it must. Checked before any
/// decoding so that a rejected file is never touched.
pub fn rejection_reason(file_metadata: &fs::Metadata) -> Option<String> {
    if !file_metadata.is_file() {
        return Some("not a regular file".to_string());
    }
    if file_metadata.len() == 0 {
        return Some("file is empty".to_string());
    }
    None
}

/// Deletes an imported original. A file that is already gone counts as
/// removed.
pub fn remove_original(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed original {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Walks `dir` for files with a supported audio extension, following
/// symlinks. Unreadable entries are logged and skipped.
pub fn collect_audio_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Error accessing entry: {}", err);
                None
            }
        })
        .filter(|e| {
            let is_file = e.file_type().is_file();
            let audio = has_audio_extension(e.path());
            if is_file && !audio {
                debug!("Skipping non-audio file: {}", e.path().display());
            }
            is_file && audio
        })
        .map(|e| e.into_path())
        .collect()
}

/// Expands directories into the audio files below them; plain file arguments
/// are passed through unchanged, whatever their extension.
pub fn expand_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let found = collect_audio_files(input);
            debug!("Found {} audio files under {}", found.len(), input.display());
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    files
}
