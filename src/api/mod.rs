//! Processing service API: HTTP client, wire types and input checks

mod client;
mod input;
mod types;

pub use client::{bundle_file_name, track_file_name, ApiClient, ApiError, ProcessingService};
pub use input::{InputError, InputFile};
pub use types::{JobResults, Track, TrackKind};
