//! External script loading for the headless frame, with an origin allowlist.
//!
//! Security model:
//! - Only URLs matching allowed origins are fetched (empty allowlist = nothing)
//! - Redirects only followed if they stay within the same origin
//! - GET only, no request body, no caller-supplied headers

use anyhow::{anyhow, Error};
use reqwest::Client;
use url::Url;

/// Redirect hops followed before giving up
const MAX_REDIRECTS: usize = 5;

/// Fetches external `<script src>` resources referenced by a pen.
#[derive(Debug, Clone)]
pub struct ResourceFetcher {
    /// Allowed origins (e.g., "https://cdn.jsdelivr.net")
    /// An origin is scheme + host + port
    allowed_origins: Vec<String>,
    client: Client,
}

impl ResourceFetcher {
    pub fn new(allowed_origins: Vec<String>) -> Result<Self, Error> {
        let client = Client::builder()
            // Don't follow redirects automatically - we'll handle them manually
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            allowed_origins,
            client,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.allowed_origins.is_empty()
    }

    pub fn is_origin_allowed(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        self.allowed_origins.iter().any(|allowed| origin == *allowed)
    }

    /// Fetch the script text at `src`.
    pub async fn fetch_script(&self, src: &str) -> Result<String, Error> {
        let mut url =
            Url::parse(src).map_err(|e| anyhow!("Invalid resource URL '{}': {}", src, e))?;
        let origin = url.origin();

        if !self.is_origin_allowed(&url) {
            return Err(anyhow!(
                "Fetch blocked: origin '{}' is not in the allowlist. Allowed: {:?}",
                origin.ascii_serialization(),
                self.allowed_origins
            ));
        }

        for _ in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| anyhow!("Fetch failed for '{}': {}", url, e))?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get("location")
                    .ok_or_else(|| anyhow!("Redirect from '{}' without location", url))?
                    .to_str()
                    .map_err(|_| anyhow!("Invalid redirect location"))?;
                let redirect_url = url
                    .join(location)
                    .map_err(|e| anyhow!("Invalid redirect URL: {}", e))?;

                // Check if redirect is to same origin
                if redirect_url.origin() != origin {
                    return Err(anyhow!(
                        "Fetch blocked: redirect to different origin '{}' (original: '{}')",
                        redirect_url.origin().ascii_serialization(),
                        origin.ascii_serialization()
                    ));
                }

                tracing::debug!(from = %url, to = %redirect_url, "following redirect");
                url = redirect_url;
                continue;
            }

            if !status.is_success() {
                return Err(anyhow!("Fetch of '{}' returned {}", url, status));
            }

            return response
                .text()
                .await
                .map_err(|e| anyhow!("Failed to read response body: {}", e));
        }

        Err(anyhow!("Too many redirects fetching '{}'", src))
    }
}
