//! Audio output backends owned by the engine thread

use std::io::Cursor;
use std::time::Duration;

use super::EngineError;

/// A sink for one decoded source at a time
pub trait AudioOutput {
    /// Replace the current source and start playing from the beginning.
    /// Returns the source duration when the container reports one.
    fn open(&mut self, bytes: Vec<u8>) -> Result<Option<Duration>, EngineError>;
    fn pause(&mut self);
    /// Pause and drop back to the start of the source
    fn stop(&mut self);
    fn seek(&mut self, position: Duration) -> Result<(), EngineError>;
    /// True once the output ran out of samples on its own
    fn is_finished(&self) -> bool;
}

/// Create the output selected at build time
#[cfg(feature = "audio-output")]
pub fn default_output() -> Result<Box<dyn AudioOutput>, EngineError> {
    Ok(Box::new(rodio_output::RodioOutput::new()?))
}

/// Create the output selected at build time
#[cfg(not(feature = "audio-output"))]
pub fn default_output() -> Result<Box<dyn AudioOutput>, EngineError> {
    Ok(Box::new(SilentOutput::default()))
}

/// Clock-only output for headless hosts.
///
/// Nothing is rendered; the engine's clock alone decides when the source
/// ends, based on the duration read from the WAV header.
#[derive(Debug, Default)]
#[cfg_attr(feature = "audio-output", allow(dead_code))]
pub struct SilentOutput {
    loaded: bool,
}

impl AudioOutput for SilentOutput {
    fn open(&mut self, bytes: Vec<u8>) -> Result<Option<Duration>, EngineError> {
        if bytes.is_empty() {
            return Err(EngineError::Decode("empty audio payload".to_string()));
        }
        self.loaded = true;
        Ok(wav_duration(&bytes))
    }

    fn pause(&mut self) {}

    fn stop(&mut self) {}

    fn seek(&mut self, _position: Duration) -> Result<(), EngineError> {
        if self.loaded {
            Ok(())
        } else {
            Err(EngineError::Output("no source loaded".to_string()))
        }
    }

    fn is_finished(&self) -> bool {
        false
    }
}

/// Duration of a WAV payload, if it parses as one
pub fn wav_duration(bytes: &[u8]) -> Option<Duration> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let rate = reader.spec().sample_rate;
    if rate == 0 {
        return None;
    }
    Some(Duration::from_secs_f64(reader.duration() as f64 / rate as f64))
}

/// In-memory silent WAV used by engine tests
#[cfg(test)]
pub(crate) fn wav_bytes(seconds: u32, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        for _ in 0..(seconds * sample_rate * 2) {
            writer.write_sample(0i16).expect("wav sample");
        }
        writer.finalize().expect("wav finalize");
    }
    cursor.into_inner()
}

#[cfg(feature = "audio-output")]
mod rodio_output {
    use std::io::Cursor;
    use std::time::Duration;

    use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};

    use super::AudioOutput;
    use crate::engine::EngineError;

    /// Plays through the default system output device
    pub struct RodioOutput {
        _stream: OutputStream,
        handle: OutputStreamHandle,
        sink: Option<Sink>,
        /// Kept so a seek can rebuild the decoder at an offset
        bytes: Vec<u8>,
    }

    impl RodioOutput {
        pub fn new() -> Result<Self, EngineError> {
            let (stream, handle) =
                OutputStream::try_default().map_err(|e| EngineError::Output(e.to_string()))?;
            Ok(Self {
                _stream: stream,
                handle,
                sink: None,
                bytes: Vec::new(),
            })
        }

        fn start_at(&mut self, position: Duration, paused: bool) -> Result<Option<Duration>, EngineError> {
            if let Some(old) = self.sink.take() {
                old.stop();
            }

            let source = Decoder::new(Cursor::new(self.bytes.clone()))
                .map_err(|e| EngineError::Decode(e.to_string()))?;
            let duration = source.total_duration();

            let sink = Sink::try_new(&self.handle).map_err(|e| EngineError::Output(e.to_string()))?;
            if paused {
                sink.pause();
            }
            sink.append(source.skip_duration(position));
            self.sink = Some(sink);

            Ok(duration)
        }
    }

    impl AudioOutput for RodioOutput {
        fn open(&mut self, bytes: Vec<u8>) -> Result<Option<Duration>, EngineError> {
            self.bytes = bytes;
            let duration = self.start_at(Duration::ZERO, false)?;
            Ok(duration.or_else(|| super::wav_duration(&self.bytes)))
        }

        fn pause(&mut self) {
            if let Some(sink) = &self.sink {
                sink.pause();
            }
        }

        fn stop(&mut self) {
            if let Some(sink) = self.sink.take() {
                sink.stop();
            }
        }

        fn seek(&mut self, position: Duration) -> Result<(), EngineError> {
            if self.bytes.is_empty() {
                return Err(EngineError::Output("no source loaded".to_string()));
            }
            let paused = self.sink.as_ref().map(|s| s.is_paused()).unwrap_or(true);
            self.start_at(position, paused).map(|_| ())
        }

        fn is_finished(&self) -> bool {
            self.sink.as_ref().map(|s| s.empty()).unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_duration() {
        let bytes = wav_bytes(3, 8000);
        assert_eq!(wav_duration(&bytes), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_non_wav_has_no_duration() {
        assert_eq!(wav_duration(b"ID3\x04\x00not really an mp3"), None);
    }

    #[test]
    fn test_silent_output() {
        let mut output = SilentOutput::default();
        assert!(output.seek(Duration::from_secs(1)).is_err());
        assert!(output.open(Vec::new()).is_err());

        let duration = output.open(wav_bytes(2, 8000)).unwrap();
        assert_eq!(duration, Some(Duration::from_secs(2)));
        assert!(output.seek(Duration::from_secs(1)).is_ok());
        assert!(!output.is_finished());
    }
}
