mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result, bail};
use tracing::debug;

/// GETs `url` and returns the body. A non-success status is an error.
#[tracing::instrument(skip(client))]
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(
        reqwest::Method::GET,
        url.parse().with_context(|| format!("invalid URL '{url}'"))?,
    );

    let resp = client
        .execute(req)
        .await
        .with_context(|| format!("requesting {url}"))?;
    let status = resp.status();
    if !status.is_success() {
        bail!("{url} returned HTTP {status}");
    }
    let body = resp
        .bytes()
        .await
        .with_context(|| format!("reading body of {url}"))?;
    debug!(bytes = body.len(), "Snapshot downloaded");
    Ok(body.to_vec())
}

/// Loads a snapshot from a local file path or fetches it over HTTP.
pub async fn read_source<C: HttpClient>(client: &C, source: &str) -> Result<Vec<u8>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        fetch_bytes(client, source).await
    } else {
        tokio::fs::read(source)
            .await
            .with_context(|| format!("reading '{source}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_fetch_bytes_returns_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/air_residence.csv");
                then.status(200).body("DATE_AS_AT,STATE\n");
            })
            .await;

        let bytes = fetch_bytes(&BasicClient::new(), &server.url("/air_residence.csv"))
            .await
            .unwrap();
        assert_eq!(bytes, b"DATE_AS_AT,STATE\n");
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_fetch_bytes_rejects_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/air_residence.csv");
                then.status(503).body("unavailable");
            })
            .await;

        let err = fetch_bytes(&BasicClient::new(), &server.url("/air_residence.csv"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_fetch_bytes_rejects_bad_url() {
        assert!(fetch_bytes(&BasicClient::new(), "not a url").await.is_err());
    }

    #[tokio::test]
    async fn test_read_source_from_file() {
        let path = std::env::temp_dir().join("vac_race_read_source.csv");
        std::fs::write(&path, "a,b\n").unwrap();
        let bytes = read_source(&BasicClient::new(), path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(bytes, b"a,b\n");
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_read_source_missing_file() {
        let err = read_source(&BasicClient::new(), "/nonexistent/vac_race.csv")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/vac_race.csv"));
    }
}
