//! Validation of user-selected input files

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Extensions accepted when content sniffing is inconclusive
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "aac", "opus", "aiff", "wma"];

/// A selected audio file, checked but not yet read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputFile {
    pub path: PathBuf,
    /// File name sent in the multipart upload
    pub name: String,
    pub size: u64,
    pub mime: String,
}

/// Errors for rejected input files
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("file is empty: {0}")]
    Empty(PathBuf),

    #[error("not an audio file: {0}")]
    NotAudio(PathBuf),

    #[error("failed to inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl InputFile {
    /// Inspect a path and accept it only if it looks like audio
    pub fn inspect(path: &Path) -> Result<Self, InputError> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(InputError::NotFound(path.to_owned()));
            }
            Err(source) => {
                return Err(InputError::Io {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        if !metadata.is_file() {
            return Err(InputError::NotAFile(path.to_owned()));
        }
        if metadata.len() == 0 {
            return Err(InputError::Empty(path.to_owned()));
        }

        let sniffed = infer::get_from_path(path).map_err(|source| InputError::Io {
            path: path.to_owned(),
            source,
        })?;

        let mime = match sniffed {
            Some(kind) if kind.matcher_type() == infer::MatcherType::Audio => {
                kind.mime_type().to_string()
            }
            // Containers such as mp4/m4a sniff as video; trust the extension there
            _ => match audio_extension(path) {
                Some(ext) => mime_for_extension(&ext).to_string(),
                None => return Err(InputError::NotAudio(path.to_owned())),
            },
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        Ok(Self {
            path: path.to_owned(),
            name,
            size: metadata.len(),
            mime,
        })
    }
}

fn audio_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    AUDIO_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" | "opus" => "audio/ogg",
        "m4a" | "aac" => "audio/mp4",
        "aiff" => "audio/aiff",
        "wma" => "audio/x-ms-wma",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("arya-input-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_wav(path: &Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..800 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_accepts_wav() {
        let dir = scratch_dir("wav");
        let path = dir.join("meeting.wav");
        write_wav(&path);

        let input = InputFile::inspect(&path).unwrap();
        assert_eq!(input.name, "meeting.wav");
        assert!(input.size > 0);
        assert!(input.mime.starts_with("audio/"));
    }

    #[test]
    fn test_rejects_missing() {
        let dir = scratch_dir("missing");
        let err = InputFile::inspect(&dir.join("nope.wav")).unwrap_err();
        assert!(matches!(err, InputError::NotFound(_)));
    }

    #[test]
    fn test_rejects_directory() {
        let dir = scratch_dir("dir");
        let err = InputFile::inspect(&dir).unwrap_err();
        assert!(matches!(err, InputError::NotAFile(_)));
    }

    #[test]
    fn test_rejects_empty() {
        let dir = scratch_dir("empty");
        let path = dir.join("silence.mp3");
        std::fs::write(&path, b"").unwrap();
        let err = InputFile::inspect(&path).unwrap_err();
        assert!(matches!(err, InputError::Empty(_)));
    }

    #[test]
    fn test_rejects_text() {
        let dir = scratch_dir("text");
        let path = dir.join("notes.txt");
        std::fs::write(&path, b"not audio at all").unwrap();
        let err = InputFile::inspect(&path).unwrap_err();
        assert!(matches!(err, InputError::NotAudio(_)));
    }

    #[test]
    fn test_extension_fallback() {
        let dir = scratch_dir("ext");
        let path = dir.join("voice.M4A");
        std::fs::write(&path, b"opaque bytes").unwrap();
        let input = InputFile::inspect(&path).unwrap();
        assert_eq!(input.mime, "audio/mp4");
    }
}
