use futures_util::StreamExt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const BIN_NAME: &str = "agentpkg";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("{url} is {size} bytes, limit is {max} bytes")]
    TooLarge { url: String, size: u64, max: u64 },

    #[error("writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Shared HTTP client with the agentpkg user agent and a per-request timeout
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("{}/{}", BIN_NAME, env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
}

fn network(url: &str) -> impl FnOnce(reqwest::Error) -> FetchError + '_ {
    move |source| FetchError::Network {
        url: url.to_string(),
        source,
    }
}

async fn get_ok(client: &reqwest::Client, url: &str) -> Result<reqwest::Response, FetchError> {
    let response = client.get(url).send().await.map_err(network(url))?;
    if !response.status().is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }
    Ok(response)
}

pub async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    get_ok(client, url).await?.text().await.map_err(network(url))
}

pub async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, FetchError> {
    get_ok(client, url).await?.json::<T>().await.map_err(network(url))
}

/// Download `url` into `dest`, refusing bodies larger than `max_bytes`.
///
/// The declared `Content-Length` is checked before reading and the running
/// total while streaming. Nothing is written to `dest` unless the whole body
/// fits.
pub async fn download_bounded(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    max_bytes: u64,
) -> Result<u64, FetchError> {
    let response = get_ok(client, url).await?;

    if let Some(declared) = response.content_length()
        && declared > max_bytes
    {
        return Err(FetchError::TooLarge {
            url: url.to_string(),
            size: declared,
            max: max_bytes,
        });
    }

    let mut body: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(network(url))?;
        let size = (body.len() + chunk.len()) as u64;
        if size > max_bytes {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                size,
                max: max_bytes,
            });
        }
        body.extend_from_slice(&chunk);
    }

    fs::write(dest, &body).map_err(|source| FetchError::Io {
        path: dest.display().to_string(),
        source,
    })?;
    Ok(body.len() as u64)
}
