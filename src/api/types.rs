//! Wire types returned by the processing endpoints

use serde::{Deserialize, Deserializer, Serialize};

use crate::state::ProcessingMode;

/// Payload returned by `/process-audio`, `/separate-music` and `/enhance-audio`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResults {
    pub job_id: String,
    pub speakers: Vec<Track>,
    /// Echoed by the music and clean endpoints only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ProcessingMode>,
}

impl JobResults {
    pub fn track(&self, speaker_id: &str) -> Option<&Track> {
        self.speakers.iter().find(|t| t.speaker_id == speaker_id)
    }
}

/// One isolated or cleaned audio result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Unique within a job; used as the track key
    pub speaker_id: String,
    /// Server-side file reference, passed back to `/download?file=`
    pub audio: String,
    #[serde(rename = "type", default)]
    pub kind: TrackKind,
    /// Seconds of speech for diarized speakers; "N/A" elsewhere
    #[serde(
        default,
        deserialize_with = "lenient_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<f64>,
}

/// Display badge of a track. No behavioural effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TrackKind {
    Stem,
    Enhanced,
    #[default]
    Plain,
}

impl From<String> for TrackKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "stem" => TrackKind::Stem,
            "enhanced" => TrackKind::Enhanced,
            _ => TrackKind::Plain,
        }
    }
}

impl From<TrackKind> for String {
    fn from(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Stem => "stem",
            TrackKind::Enhanced => "enhanced",
            TrackKind::Plain => "plain",
        }
        .to_string()
    }
}

impl TrackKind {
    pub fn badge(&self) -> Option<&'static str> {
        match self {
            TrackKind::Stem => Some("STEM"),
            TrackKind::Enhanced => Some("CLEAN"),
            TrackKind::Plain => None,
        }
    }
}

/// Accepts a number of seconds; any other JSON value reads as `None`
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speech_response() {
        let json = r#"{
            "job_id": "job_1a2b3c4d",
            "speakers": [
                {"speaker_id": "SPEAKER_00", "duration": 12.5, "audio": "outputs/jobs/job_1a2b3c4d/speakers/SPEAKER_00.wav"},
                {"speaker_id": "SPEAKER_01", "duration": 3.1, "audio": "outputs/jobs/job_1a2b3c4d/speakers/SPEAKER_01.wav"}
            ]
        }"#;
        let results: JobResults = serde_json::from_str(json).unwrap();
        assert_eq!(results.speakers.len(), 2);
        assert_eq!(results.speakers[0].kind, TrackKind::Plain);
        assert_eq!(results.speakers[0].duration, Some(12.5));
        assert_eq!(results.mode, None);
    }

    #[test]
    fn test_music_response() {
        let json = r#"{
            "job_id": "song",
            "speakers": [
                {"speaker_id": "Vocals", "duration": "N/A", "audio": "outputs/demucs/htdemucs/song/vocals.wav", "type": "stem"}
            ],
            "mode": "music"
        }"#;
        let results: JobResults = serde_json::from_str(json).unwrap();
        let track = results.track("Vocals").unwrap();
        assert_eq!(track.kind, TrackKind::Stem);
        assert_eq!(track.kind.badge(), Some("STEM"));
        assert_eq!(track.duration, None);
        assert_eq!(results.mode, Some(ProcessingMode::Music));
    }

    #[test]
    fn test_unknown_track_type_is_plain() {
        let json = r#"{"speaker_id": "A", "audio": "a.wav", "type": "remix"}"#;
        let track: Track = serde_json::from_str(json).unwrap();
        assert_eq!(track.kind, TrackKind::Plain);
        assert_eq!(track.kind.badge(), None);
    }

    #[test]
    fn test_enhanced_badge() {
        let json = r#"{"speaker_id": "Enhanced Audio", "audio": "outputs/enhanced/x/clean.wav", "type": "enhanced"}"#;
        let track: Track = serde_json::from_str(json).unwrap();
        assert_eq!(track.kind.badge(), Some("CLEAN"));
    }
}
