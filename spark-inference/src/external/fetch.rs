use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {message}")]
    Transport { url: String, message: String },
}

/// Called with `(bytes received, total bytes if known)` while a body downloads.
pub type FetchProgress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

#[async_trait]
pub trait ModelFetcher: Send + Sync {
    async fn fetch(&self, url: &str, progress: FetchProgress<'_>) -> Result<Bytes, FetchError>;
}

/// Upper bound on the buffer reserved up front from `Content-Length`.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

fn initial_capacity(content_length: Option<u64>) -> usize {
    content_length.unwrap_or(0).min(MAX_PREALLOCATION) as usize
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, progress: FetchProgress<'_>) -> Result<Bytes, FetchError> {
        let transport = |err: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        };

        let mut response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        let mut body = BytesMut::with_capacity(initial_capacity(total));
        progress(0, total);
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            body.extend_from_slice(&chunk);
            progress(body.len() as u64, total);
        }
        debug!("fetched {} bytes from {url}", body.len());

        Ok(body.freeze())
    }
}
