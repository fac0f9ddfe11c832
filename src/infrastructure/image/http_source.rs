//! HTTP byte source streaming response bodies with `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::{ByteSource, ByteStream};
use crate::infrastructure::config::NetworkConfig;

/// Fetches resources over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpByteSource {
    client: reqwest::Client,
}

impl HttpByteSource {
    /// Builds a client with the configured timeout and user agent.
    ///
    /// # Errors
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(config: &NetworkConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ByteSource for HttpByteSource {
    async fn open_stream(&self, url: &str) -> LoadResult<ByteStream> {
        debug!(url = %url, "Opening HTTP stream");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoadError::transport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::transport(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| LoadError::transport(format!("failed to read body: {e}")))
        });
        Ok(body.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned response on a loopback port.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}/image.png")
    }

    fn loopback_source() -> HttpByteSource {
        HttpByteSource::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
    }

    async fn collect(mut stream: ByteStream) -> LoadResult<Vec<u8>> {
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body)
    }

    #[tokio::test]
    async fn test_streams_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let source = loopback_source();

        let stream = source.open_stream(&url).await.unwrap();
        assert_eq!(collect(stream).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_error_status_is_transport_error() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let source = loopback_source();

        let err = source.open_stream(&url).await.err().unwrap();
        assert!(matches!(err, LoadError::Transport { .. }));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_malformed_url_is_transport_error() {
        let source = HttpByteSource::new(&NetworkConfig::default()).unwrap();
        assert!(matches!(
            source.open_stream("not a url").await,
            Err(LoadError::Transport { .. })
        ));
    }
}
