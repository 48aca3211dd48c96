//! ECB Reference Rate Client
//!
//! Fetches the European Central Bank daily reference rates and hands them to
//! the rate table as raw `(currency, rate)` rows.
//!
//! # Document Shape
//!
//! ```xml
//! <gesmes:Envelope>
//!   <Cube>
//!     <Cube time="2024-01-05">
//!       <Cube currency="USD" rate="1.0921"/>
//!       <Cube currency="JPY" rate="158.17"/>
//!     </Cube>
//!   </Cube>
//! </gesmes:Envelope>
//! ```
//!
//! The euro itself is not listed; the table pins it to 1.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::application::ports::{RateSnapshotSource, SnapshotError};
use crate::domain::rates::SnapshotEntry;

/// Published location of the daily reference rates.
pub const DEFAULT_ECB_URL: &str = "https://www.ecb.europa.eu/stats/eurofxref/eurofxref-daily.xml";

const USER_AGENT: &str = concat!("currency-service/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// XML Document
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Cube")]
    cube: OuterCube,
}

#[derive(Debug, Default, Deserialize)]
struct OuterCube {
    #[serde(rename = "Cube", default)]
    days: Vec<DayCube>,
}

#[derive(Debug, Deserialize)]
struct DayCube {
    #[serde(rename = "@time", default)]
    time: Option<String>,
    #[serde(rename = "Cube", default)]
    rates: Vec<RateCube>,
}

#[derive(Debug, Deserialize)]
struct RateCube {
    #[serde(rename = "@currency")]
    currency: String,
    #[serde(rename = "@rate")]
    rate: String,
}

/// Decode an ECB reference rate document.
///
/// # Errors
///
/// Returns [`SnapshotError::Malformed`] if the document does not have the
/// `Cube > Cube > Cube` structure.
pub fn parse_reference_rates(xml: &str) -> Result<Vec<SnapshotEntry>, SnapshotError> {
    let envelope: Envelope =
        quick_xml::de::from_str(xml).map_err(|e| SnapshotError::Malformed(e.to_string()))?;

    let mut entries = Vec::new();
    for day in envelope.cube.days {
        debug!(
            date = day.time.as_deref().unwrap_or("unknown"),
            rates = day.rates.len(),
            "Parsed rate day"
        );
        entries.extend(
            day.rates
                .into_iter()
                .map(|cube| SnapshotEntry::new(cube.currency, cube.rate)),
        );
    }

    Ok(entries)
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the ECB daily reference feed.
#[derive(Debug, Clone)]
pub struct EcbClient {
    http: reqwest::Client,
    url: String,
}

impl EcbClient {
    /// Create a client for the given document URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RateSnapshotSource for EcbClient {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch_snapshot(&self) -> Result<Vec<SnapshotEntry>, SnapshotError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SnapshotError::Unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SnapshotError::Unavailable(format!(
                "unexpected status {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SnapshotError::Unavailable(format!("failed to read body: {e}")))?;

        let entries = parse_reference_rates(&body)?;
        debug!(entries = entries.len(), "Fetched reference rates");
        Ok(entries)
    }
}

// =============================================================================
// Tests
// =============================================================================
