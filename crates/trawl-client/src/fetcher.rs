use std::time::Duration;

use reqwest::Client;
use trawl_core::error::{AppError, FetchFailureKind};
use trawl_core::identity::Identity;
use trawl_core::traits::{FetchedPage, Fetcher};
use url::Url;

/// HTTP fetcher using reqwest.
///
/// Performs one GET per call with the caller's identity. Every request is
/// bounded by the client timeout. Non-2xx responses come back as a
/// [`FetchedPage`] so the retry layer can classify them.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| AppError::ConfigError(format!("HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, identity: &Identity) -> Result<FetchedPage, AppError> {
        let parsed = Url::parse(url).map_err(|e| {
            AppError::fetch(FetchFailureKind::InvalidUrl, format!("Invalid URL: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::fetch(
                FetchFailureKind::InvalidUrl,
                format!("URL scheme '{}' is not allowed (only http/https)", parsed.scheme()),
            ));
        }

        let mut request = self
            .client
            .get(parsed)
            .header(reqwest::header::USER_AGENT, identity.user_agent());
        for (name, value) in identity.headers() {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        tracing::debug!(%url, %status, "Received response");

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::fetch(FetchFailureKind::Timeout, format!("Reading body: {e}"))
            } else {
                AppError::fetch(
                    FetchFailureKind::Network,
                    format!("Failed to read response body: {e}"),
                )
            }
        })?;

        Ok(FetchedPage { status, body })
    }
}

fn classify(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::fetch(FetchFailureKind::Timeout, e.to_string())
    } else if e.is_connect() {
        AppError::fetch(FetchFailureKind::Network, format!("Connection failed: {e}"))
    } else if e.is_builder() {
        AppError::fetch(FetchFailureKind::InvalidUrl, e.to_string())
    } else {
        AppError::fetch(FetchFailureKind::Network, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serve one canned response and hand back the raw request text.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (format!("http://{addr}/jobs/page/1/"), handle)
    }

    #[tokio::test]
    async fn sends_identity_headers() {
        let (url, server) = serve_once("200 OK", "<html>jobs</html>").await;
        let fetcher = ReqwestFetcher::new().unwrap();
        let identity = Identity::new("TrawlTest/1.0").with_header("Referer", "https://pinoyjobs.ph/");

        let page = fetcher.fetch(&url, &identity).await.unwrap();
        assert_eq!(page, FetchedPage::ok("<html>jobs</html>"));

        let request = server.await.unwrap().to_lowercase();
        assert!(request.contains("user-agent: trawltest/1.0"));
        assert!(request.contains("accept-language: en-us"));
        assert!(request.contains("referer: https://pinoyjobs.ph/"));
    }

    #[tokio::test]
    async fn error_status_is_not_an_error() {
        let (url, server) = serve_once("503 Service Unavailable", "busy").await;
        let fetcher = ReqwestFetcher::new().unwrap();

        let page = fetcher.fetch(&url, &Identity::new("t")).await.unwrap();
        assert_eq!(page.status, 503);
        assert_eq!(page.body, "busy");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let fetcher = ReqwestFetcher::new().unwrap();
        let err = fetcher
            .fetch("file:///etc/passwd", &Identity::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::FetchError {
                kind: FetchFailureKind::InvalidUrl,
                retriable: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_retriable() {
        // Bind then drop to get a port nothing listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let fetcher = ReqwestFetcher::with_timeout(Duration::from_secs(2)).unwrap();

        let err = fetcher
            .fetch(&format!("http://{addr}/"), &Identity::new("t"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
