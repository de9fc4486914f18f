//! HTTP smoke checks against a live deployment of the tracker API
//!
//! Exercises the application's read endpoints after cutover so the report
//! shows whether the service can actually serve from the new destination.

use serde::Serialize;
use std::time::{Duration, Instant};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiCheck {
    pub endpoint: String,
    pub status: Option<u16>,
    pub latency_ms: f64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApiResult {
    pub success: bool,
    pub base_url: String,
    pub checks: Vec<ApiCheck>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ApiSmokeTester {
    client: reqwest::Client,
    base_url: String,
}

impl ApiSmokeTester {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Endpoints checked for an optional sampled tracking number
    pub fn endpoints(sample_tracking_number: Option<&str>) -> Vec<String> {
        let mut endpoints = vec!["/api/health".to_string(), "/api/packages".to_string()];
        if let Some(tracking_number) = sample_tracking_number {
            endpoints.push(format!("/api/packages/{}", tracking_number));
        }
        endpoints
    }

    /// GET every endpoint; any transport error or non-2xx fails the phase
    pub async fn run(&self, sample_tracking_number: Option<&str>) -> ApiResult {
        log::info!("Running API smoke checks against {}", self.base_url);
        let mut result = ApiResult {
            base_url: self.base_url.clone(),
            ..Default::default()
        };

        for endpoint in Self::endpoints(sample_tracking_number) {
            let check = self.check(&endpoint).await;
            if !check.success {
                result.errors.push(format!(
                    "GET {} failed: {}",
                    endpoint,
                    check.error.as_deref().unwrap_or("unexpected status")
                ));
            }
            result.checks.push(check);
        }

        result.success = result.errors.is_empty();
        result
    }

    async fn check(&self, endpoint: &str) -> ApiCheck {
        let url = format!("{}{}", self.base_url, endpoint);
        let start = Instant::now();
        let response = self.client.get(&url).send().await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match response {
            Ok(response) => {
                let status = response.status();
                log::debug!("GET {} -> {} in {:.1}ms", url, status, latency_ms);
                ApiCheck {
                    endpoint: endpoint.to_string(),
                    status: Some(status.as_u16()),
                    latency_ms,
                    success: status.is_success(),
                    error: (!status.is_success()).then(|| format!("HTTP {}", status)),
                }
            }
            Err(e) => ApiCheck {
                endpoint: endpoint.to_string(),
                status: None,
                latency_ms,
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_include_sample_lookup() {
        let endpoints = ApiSmokeTester::endpoints(Some("TRK12345678"));
        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[2], "/api/packages/TRK12345678");
        assert_eq!(ApiSmokeTester::endpoints(None).len(), 2);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let tester = ApiSmokeTester::new("http://localhost:3000/").unwrap();
        assert_eq!(tester.base_url, "http://localhost:3000");
    }

    #[tokio::test]
    async fn test_unreachable_api_fails_every_check() {
        let tester = ApiSmokeTester::new("http://127.0.0.1:1").unwrap();
        let result = tester.run(None).await;
        assert!(!result.success);
        assert_eq!(result.checks.len(), 2);
        assert!(result.checks.iter().all(|c| c.status.is_none()));
    }
}
