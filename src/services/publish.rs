//! Publishes frame grids to a temporary public file host.

use crate::config::UploadConfig;
use crate::error::{AssistantError, Result};
use crate::services::{AssetPublisher, http_client};
use crate::video::grid::CompositeImage;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::info;

/// Multipart upload to tmpfiles.org, returning the direct-download URL.
pub struct TmpFilesPublisher {
    client: reqwest::Client,
    config: UploadConfig,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    data: Option<UploadData>,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    url: String,
}

impl TmpFilesPublisher {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: UploadConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(Some(Duration::from_secs(30)))?,
            config,
        })
    }

    /// Page URL → direct download URL.
    fn direct_link(&self, url: &str) -> String {
        match url.strip_prefix(&self.config.page_prefix) {
            Some(rest) if !rest.starts_with("dl/") => {
                format!("{}{rest}", self.config.download_prefix)
            }
            _ => url.to_owned(),
        }
    }
}

#[async_trait]
impl AssetPublisher for TmpFilesPublisher {
    async fn publish(&self, image: &CompositeImage) -> Result<String> {
        let bytes = image.to_bytes()?;
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name("image.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| AssistantError::Upload(format!("bad upload part: {e}")))?;

        let started = Instant::now();
        let response = self
            .client
            .post(&self.config.api_url)
            .multipart(Form::new().part("file", part))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssistantError::Upload(format!("HTTP {}", status.as_u16())));
        }
        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::Upload(format!("invalid upload body: {e}")))?;
        let url = body
            .data
            .map(|d| d.url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AssistantError::Upload("upload response has no URL".into()))?;

        let link = self.direct_link(&url);
        info!(
            "published {} frame grid ({size} bytes) in {}ms",
            image.frames(),
            started.elapsed().as_millis()
        );
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn page_url_becomes_direct_link() {
        let p = TmpFilesPublisher::new(UploadConfig::default()).unwrap();
        assert_eq!(
            p.direct_link("https://tmpfiles.org/123/image.jpg"),
            "https://tmpfiles.org/dl/123/image.jpg"
        );
        assert_eq!(
            p.direct_link("https://tmpfiles.org/dl/123/image.jpg"),
            "https://tmpfiles.org/dl/123/image.jpg"
        );
        assert_eq!(p.direct_link("https://other.host/x.jpg"), "https://other.host/x.jpg");
    }
}
