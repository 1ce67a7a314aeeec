//! Media playlist

use crate::player::AudioError;
use std::fs;
use std::path::{Path, PathBuf};

/// File extensions accepted as audio (mpg123 plays MPEG only)
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3"];

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Audio files played in name order, looping forever
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    files: Vec<PathBuf>,
    cursor: usize,
}

impl Playlist {
    /// Build from a directory of audio files or a single file
    pub fn from_path(path: &Path) -> Result<Self, AudioError> {
        let files = if path.is_dir() {
            let entries = fs::read_dir(path).map_err(|source| AudioError::Media {
                path: path.to_path_buf(),
                source,
            })?;
            let mut files: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && is_audio_file(p))
                .collect();
            files.sort();
            files
        } else if path.is_file() && is_audio_file(path) {
            vec![path.to_path_buf()]
        } else {
            Vec::new()
        };

        if files.is_empty() {
            return Err(AudioError::NoMedia(path.to_path_buf()));
        }
        tracing::info!("Audio files found: {}", files.len());
        Ok(Self { files, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Next file to play, wrapping after the last
    pub fn next_file(&mut self) -> &Path {
        let index = self.cursor % self.files.len();
        self.cursor = (index + 1) % self.files.len();
        &self.files[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_audio_file() {
        assert!(is_audio_file(Path::new("/a/crackle.mp3")));
        assert!(is_audio_file(Path::new("LOG.MP3")));
        assert!(!is_audio_file(Path::new("fire.wav")));
        assert!(!is_audio_file(Path::new("notes.txt")));
        assert!(!is_audio_file(Path::new("mp3")));
    }

    #[test]
    fn test_directory_sorted_and_cycled() {
        let dir = tempdir().unwrap();
        for name in ["b.mp3", "a.mp3", "c.txt", "d.mp3", "e.wav"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("nested.mp3")).unwrap();

        let mut playlist = Playlist::from_path(dir.path()).unwrap();
        assert_eq!(playlist.len(), 3);

        let order: Vec<String> = (0..4)
            .map(|_| {
                let file = playlist.next_file();
                file.file_name().unwrap().to_string_lossy().into_owned()
            })
            .collect();
        assert_eq!(order, vec!["a.mp3", "b.mp3", "d.mp3", "a.mp3"]);
    }

    #[test]
    fn test_single_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("fire.mp3");
        fs::write(&file, b"x").unwrap();

        let mut playlist = Playlist::from_path(&file).unwrap();
        assert_eq!(playlist.next_file(), file.as_path());
        assert_eq!(playlist.next_file(), file.as_path());
    }

    #[test]
    fn test_no_media() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Playlist::from_path(dir.path()),
            Err(AudioError::NoMedia(_))
        ));
        assert!(matches!(
            Playlist::from_path(&dir.path().join("missing.mp3")),
            Err(AudioError::NoMedia(_))
        ));
    }
}
