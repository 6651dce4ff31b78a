//! Worker progress scraping
//!
//! Workers serve Prometheus text on `/metrics`. The controller reads the
//! gauge `volume_populators_<tag>{<key>="<source id>"}` and stores it in the
//! populator request status.

use crate::error::PopulatorError;
use async_trait::async_trait;
use crds::PopulatorKind;
use std::time::Duration;

const SCRAPE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait ProgressSource: Send + Sync {
    /// Fetch the metrics text served at `url`
    async fn fetch(&self, url: &str) -> Result<String, PopulatorError>;
}

/// Plain HTTP scraper; worker pods serve metrics without TLS
pub struct HttpProgress {
    client: reqwest::Client,
}

impl HttpProgress {
    pub fn new() -> Result<Self, PopulatorError> {
        let client = reqwest::Client::builder().timeout(SCRAPE_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProgressSource for HttpProgress {
    async fn fetch(&self, url: &str) -> Result<String, PopulatorError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(PopulatorError::Scrape(format!("{url} returned {}", response.status())));
        }
        Ok(response.text().await?)
    }
}

pub fn metrics_url(pod_ip: &str, port: i32) -> String {
    format!("http://{pod_ip}:{port}/metrics")
}

/// Percentage reported for `source_id`, clamped to 0..=100.
///
/// Returns `None` when the worker has not published the series yet.
pub fn parse_progress(text: &str, kind: PopulatorKind, source_id: &str) -> Option<u8> {
    let series = format!("{}{{{}=\"{}\"}}", kind.metric_name(), kind.metric_key(), source_id);
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let value = line.strip_prefix(&series)?;
            let value: f64 = value.split_whitespace().next()?.parse().ok()?;
            if value.is_finite() {
                Some(value.clamp(0.0, 100.0) as u8)
            } else {
                None
            }
        })
}
