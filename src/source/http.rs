//! HTTP source backed by `reqwest`, using `HEAD` for the size and `Range`
//! requests for restarts.
//!
//! 基于 `reqwest` 的 HTTP 数据源：`HEAD` 获取大小，`Range` 请求用于重新定位。

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::{Client, Response, StatusCode, Url};
use tracing::debug;

use super::ByteSource;
use crate::error::{Error, Result};

pub struct HttpSource {
    client: Client,
    url: Url,
    size: Option<u64>,
    response: Option<Response>,
}

impl HttpSource {
    /// Probes `url` with a `HEAD` request to learn its length.
    ///
    /// No body is requested until [`ByteSource::reopen_at`] is called.
    pub async fn connect(client: Client, url: Url) -> Result<Self> {
        let head = client.head(url.clone()).send().await?.error_for_status()?;
        let size = head
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        debug!(%url, ?size, "probed remote size");

        Ok(Self {
            client,
            url,
            size,
            response: None,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        let Some(response) = self.response.as_mut() else {
            return Ok(None);
        };
        let chunk = response.chunk().await?;
        if chunk.is_none() {
            self.response = None;
        }
        Ok(chunk)
    }

    async fn reopen_at(&mut self, offset: u64) -> Result<()> {
        self.response = None;

        let mut request = self.client.get(self.url.clone());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request.send().await.map_err(|e| Error::SeekFailed {
            offset,
            reason: e.to_string(),
        })?;

        let status = response.status();
        let accepted = if offset > 0 {
            status == StatusCode::PARTIAL_CONTENT
        } else {
            status.is_success()
        };
        if !accepted {
            return Err(Error::SeekFailed {
                offset,
                reason: format!("server answered {status}"),
            });
        }

        debug!(offset, %status, "opened remote stream");
        self.response = Some(response);
        Ok(())
    }

    fn cancel(&mut self) {
        self.response = None;
    }

    fn size(&self) -> Option<u64> {
        self.size
    }
}
