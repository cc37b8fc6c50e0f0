//! Rendering of media blocks found in generated text.
//!
//! An `<image>` or `<audio>` block carries a URL. Rendering fetches it and
//! inlines the bytes as base64 so the consumer never needs network access of
//! its own. `data:` URIs are decoded in place without a fetch.

use crate::types::{ContentBlock, MediaSource};
use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio_util::sync::CancellationToken;

/// Which block a media payload becomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    fn block(&self, source: MediaSource) -> ContentBlock {
        match self {
            MediaKind::Image => ContentBlock::Image { source },
            MediaKind::Audio => ContentBlock::Audio { source },
        }
    }

    fn fallback_media_type(&self) -> &'static str {
        match self {
            MediaKind::Image => "image/png",
            MediaKind::Audio => "audio/mpeg",
        }
    }
}

/// Fetch `url` and build an inline media block
pub async fn render_media(
    client: &reqwest::Client,
    kind: MediaKind,
    url: &str,
    cancel: &CancellationToken,
) -> Result<ContentBlock> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::parse("empty media reference"));
    }
    if let Some(source) = parse_data_uri(url) {
        return Ok(kind.block(source));
    }

    let fetch = async {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::parse(format!("failed to fetch {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(Error::parse(format!(
                "failed to fetch {}: status {}",
                url,
                response.status()
            )));
        }
        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty() && v != "application/octet-stream")
            .unwrap_or_else(|| guess_media_type(url, kind).to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::parse(format!("failed to read {}: {}", url, e)))?;
        Ok((media_type, bytes))
    };

    let (media_type, bytes) = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        fetched = fetch => fetched?,
    };

    log::debug!("rendered {} bytes of {} from {}", bytes.len(), media_type, url);
    Ok(kind.block(MediaSource::Base64 {
        media_type,
        data: STANDARD.encode(&bytes),
    }))
}

fn parse_data_uri(uri: &str) -> Option<MediaSource> {
    let rest = uri.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let media_type = header.strip_suffix(";base64")?;
    Some(MediaSource::Base64 {
        media_type: media_type.to_string(),
        data: data.to_string(),
    })
}

fn guess_media_type(url: &str, kind: MediaKind) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    let ext = path.rsplit('.').next().unwrap_or("");
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        _ => kind.fallback_media_type(),
    }
}
