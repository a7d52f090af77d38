//! Base64 helpers for reference images and generated output.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use shared::protocol::ReferenceImage;
use thiserror::Error;

pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("'{0}' is empty")]
    Empty(PathBuf),
    #[error("Could not download image from {url}: {message}")]
    Download { url: String, message: String },
    #[error("invalid base64 image payload: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// A `data:` URL split into its parts. Plain base64 input yields no mime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUrl<'a> {
    pub mime_type: Option<&'a str>,
    pub data: &'a str,
}

/// Drops a `data:<mime>;base64,` prefix if present.
pub fn clean_base64(data: &str) -> &str {
    parse_data_url(data).data
}

pub fn parse_data_url(input: &str) -> DataUrl<'_> {
    let Some((header, payload)) = input.split_once(',') else {
        return DataUrl {
            mime_type: None,
            data: input,
        };
    };

    let mime_type = header
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .filter(|mime| !mime.is_empty());
    DataUrl {
        mime_type,
        data: payload,
    }
}

pub fn guess_image_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .filter(|mime| mime.starts_with("image/"))
        .unwrap_or(DEFAULT_IMAGE_MIME)
        .to_string()
}

pub async fn file_to_reference(path: &Path) -> Result<ReferenceImage, MediaError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| MediaError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(MediaError::Empty(path.to_path_buf()));
    }
    Ok(ReferenceImage::new(STANDARD.encode(bytes), guess_image_mime(path)))
}

pub async fn fetch_image_base64(http: &Client, url: &str) -> Result<String, MediaError> {
    let download_error = |message: String| MediaError::Download {
        url: url.to_string(),
        message,
    };

    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| download_error(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(download_error(format!("status {status}")));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| download_error(e.to_string()))?;
    if bytes.is_empty() {
        return Err(download_error("empty body".to_string()));
    }
    Ok(STANDARD.encode(bytes))
}

pub fn decode_image(data: &str) -> Result<Vec<u8>, MediaError> {
    Ok(STANDARD.decode(clean_base64(data).trim())?)
}
