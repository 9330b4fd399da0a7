//! Video sources accepted for summarization.

use std::path::Path;

use url::Url;

use crate::{
    codec::bytes_to_transport_text,
    error::{Result, VidtalkError},
    protocol::Part,
};

/// Largest file sent inline in a single request (20 MiB).
pub const MAX_INLINE_VIDEO_BYTES: u64 = 20 * 1024 * 1024;

const VIDEO_TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("mpeg", "video/mpeg"),
    ("mpg", "video/mpeg"),
    ("mov", "video/mov"),
    ("avi", "video/avi"),
    ("flv", "video/x-flv"),
    ("webm", "video/webm"),
    ("wmv", "video/wmv"),
    ("3gp", "video/3gpp"),
    ("mkv", "video/x-matroska"),
];

/// MIME type for a video file extension (case-insensitive, no dot).
pub fn video_mime_for_extension(ext: &str) -> Option<&'static str> {
    VIDEO_TYPES
        .iter()
        .find(|(e, _)| e.eq_ignore_ascii_case(ext))
        .map(|(_, mime)| *mime)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoInput {
    /// Uploaded bytes, sent base64-encoded in the request.
    Inline { mime_type: String, data: Vec<u8> },
    /// A public http(s) link the model fetches itself.
    Link { url: String },
}

impl VideoInput {
    /// Read and validate a local video file.
    ///
    /// # Errors
    /// `InvalidMedia` for an unknown extension or a file over the inline
    /// limit (checked before reading); `Io` if the file cannot be read.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mime_type = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(video_mime_for_extension)
            .ok_or_else(|| {
                VidtalkError::InvalidMedia(format!("{} is not a supported video type", path.display()))
            })?;

        let size = std::fs::metadata(path)?.len();
        check_size(size)?;

        let data = std::fs::read(path)?;
        Self::from_bytes(mime_type, data)
    }

    /// Validate already-loaded bytes.
    ///
    /// # Errors
    /// `InvalidMedia` for a non-`video/*` MIME type, empty data or data over
    /// the inline limit.
    pub fn from_bytes(mime_type: &str, data: Vec<u8>) -> Result<Self> {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        if !mime_type.starts_with("video/") {
            return Err(VidtalkError::InvalidMedia(format!(
                "expected a video/* type, got {mime_type}"
            )));
        }
        if data.is_empty() {
            return Err(VidtalkError::InvalidMedia("video file is empty".into()));
        }
        check_size(data.len() as u64)?;
        Ok(Self::Inline { mime_type, data })
    }

    /// # Errors
    /// `InvalidMedia` unless `raw` is an absolute http or https URL.
    pub fn from_link(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| VidtalkError::InvalidMedia(format!("invalid video link: {e}")))?;
        match url.scheme() {
            "http" | "https" if url.host_str().is_some() => Ok(Self::Link { url: url.into() }),
            scheme => Err(VidtalkError::InvalidMedia(format!(
                "video link must be http or https, got {scheme}"
            ))),
        }
    }

    /// Request part carrying this video.
    pub fn to_part(&self) -> Part {
        match self {
            Self::Inline { mime_type, data } => {
                Part::inline(mime_type.clone(), bytes_to_transport_text(data))
            }
            Self::Link { url } => Part::file(None, url.clone()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Inline { mime_type, data } => format!("{mime_type}, {} bytes", data.len()),
            Self::Link { url } => url.clone(),
        }
    }
}

fn check_size(size: u64) -> Result<()> {
    if size > MAX_INLINE_VIDEO_BYTES {
        return Err(VidtalkError::InvalidMedia(format!(
            "video is {size} bytes; the limit is {MAX_INLINE_VIDEO_BYTES} bytes"
        )));
    }
    Ok(())
}
