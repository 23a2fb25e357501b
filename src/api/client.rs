//! HTTP client for the processing service
//!
//! Uploads go to the per-mode endpoint as a multipart form with a single
//! `file` field. Tracks and bundles are fetched through `/download` and
//! `/jobs/<id>/download-all`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::input::InputFile;
use super::types::{JobResults, Track};
use crate::state::ProcessingMode;

const USER_AGENT: &str = concat!("arya-client/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors talking to the processing service
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response; carries the status text
    #[error("Server Error: {text}")]
    Status { code: u16, text: String },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    fn from_status(status: StatusCode) -> Self {
        let text = status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.as_str().to_string());
        ApiError::Status {
            code: status.as_u16(),
            text,
        }
    }
}

/// The remote processing engine, as seen by the job controller
pub trait ProcessingService: Send + Sync + 'static {
    /// Upload `input` to the endpoint of `mode` and wait for its results
    fn process(
        &self,
        mode: ProcessingMode,
        input: InputFile,
    ) -> BoxFuture<'static, Result<JobResults, ApiError>>;
}

/// Client for the processing service REST API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: Url) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Stream/download URL for a track
    pub fn track_url(&self, track: &Track) -> Result<Url, ApiError> {
        let mut url = self.endpoint(&["download"])?;
        url.query_pairs_mut().append_pair("file", &track.audio);
        Ok(url)
    }

    /// ZIP bundle URL for every track of a job
    pub fn bundle_url(&self, job_id: &str, mode: ProcessingMode) -> Result<Url, ApiError> {
        let mut url = self.endpoint(&["jobs", job_id, "download-all"])?;
        url.query_pairs_mut().append_pair("mode", mode.as_str());
        Ok(url)
    }

    /// Upload a file for processing
    pub async fn submit(&self, mode: ProcessingMode, input: &InputFile) -> Result<JobResults, ApiError> {
        let url = self.endpoint(&[mode.endpoint().trim_start_matches('/')])?;
        let bytes = tokio::fs::read(&input.path).await?;

        let part = Part::bytes(bytes)
            .file_name(input.name.clone())
            .mime_str(&input.mime)
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let form = Form::new().part("file", part);

        info!(%url, file = %input.name, size = input.size, "uploading audio");

        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_status(status));
        }

        let results = response
            .json::<JobResults>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        debug!(job_id = %results.job_id, tracks = results.speakers.len(), "processing response parsed");
        Ok(results)
    }

    /// Stream `url` into `destination`, returning the number of bytes written
    pub async fn download_to(&self, url: Url, destination: &Path) -> Result<u64, ApiError> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_status(status));
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    /// Append path segments to the base URL, keeping any base path prefix
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl ProcessingService for ApiClient {
    fn process(
        &self,
        mode: ProcessingMode,
        input: InputFile,
    ) -> BoxFuture<'static, Result<JobResults, ApiError>> {
        let client = self.clone();
        Box::pin(async move { client.submit(mode, &input).await })
    }
}

/// File name a bundle is saved under
pub fn bundle_file_name(job_id: &str) -> String {
    format!("{}_files.zip", sanitize(job_id))
}

/// File name a single track is saved under
pub fn track_file_name(track: &Track) -> PathBuf {
    let name = Path::new(&track.audio)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.wav", track.speaker_id));
    PathBuf::from(sanitize(&name))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::TrackKind;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(Url::parse(base).unwrap()).unwrap()
    }

    fn track(audio: &str) -> Track {
        Track {
            speaker_id: "SPEAKER_00".to_string(),
            audio: audio.to_string(),
            kind: TrackKind::Plain,
            duration: None,
        }
    }

    #[test]
    fn test_track_url_encodes_reference() {
        let c = client("http://localhost:8000");
        let url = c.track_url(&track("outputs/jobs/job 1/a&b.wav")).unwrap();
        assert_eq!(url.path(), "/download");
        let (key, value) = url.query_pairs().next().unwrap();
        assert_eq!(key, "file");
        assert_eq!(value, "outputs/jobs/job 1/a&b.wav");
    }

    #[test]
    fn test_base_path_is_kept() {
        let c = client("https://example.com/api/");
        let url = c.track_url(&track("outputs/x.wav")).unwrap();
        assert_eq!(url.path(), "/api/download");
    }

    #[test]
    fn test_bundle_url() {
        let c = client("http://localhost:8000");
        let url = c.bundle_url("job_1a2b3c4d", ProcessingMode::Music).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/jobs/job_1a2b3c4d/download-all?mode=music"
        );
    }

    #[test]
    fn test_status_error_message() {
        let err = ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Server Error: Internal Server Error");
    }

    #[test]
    fn test_download_file_names() {
        assert_eq!(bundle_file_name("job_1"), "job_1_files.zip");
        assert_eq!(bundle_file_name("../etc"), ".._etc_files.zip");
        assert_eq!(
            track_file_name(&track("outputs/demucs/htdemucs/song/vocals.wav")),
            PathBuf::from("vocals.wav")
        );
    }
}
