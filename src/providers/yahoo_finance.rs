use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::core::error::FetchError;
use crate::core::quote::RawBar;
use crate::core::source::QuoteSource;

/// Daily bars from the Yahoo Finance chart endpoint.
pub struct YahooChartSource {
    base_url: String,
    client: reqwest::Client,
}

impl YahooChartSource {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("aurum/0.1")
            .timeout(timeout)
            .build()?;
        Ok(YahooChartSource {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Option<Vec<ChartItem>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: String,
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
struct ChartMeta {
    /// Exchange offset from UTC in seconds; bars are stamped at the local
    /// session open, so the offset is needed to get the trading date right.
    gmtoffset: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<QuoteIndicator>,
}

#[derive(Deserialize, Debug, Default)]
struct QuoteIndicator {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

fn value_at<T: Copy>(values: &[Option<T>], index: usize) -> Option<T> {
    values.get(index).copied().flatten()
}

fn extract_bars(item: ChartItem) -> Result<Vec<RawBar>, FetchError> {
    let timestamps = item.timestamp.unwrap_or_default();
    if timestamps.is_empty() {
        return Err(FetchError::EmptyPayload);
    }
    let quote = item
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .ok_or_else(|| FetchError::Malformed("missing quote indicators".to_string()))?;
    let offset = item.meta.and_then(|m| m.gmtoffset).unwrap_or(0);

    timestamps
        .iter()
        .enumerate()
        .map(|(i, ts)| {
            let date = ts
                .checked_add(offset)
                .and_then(|local| DateTime::from_timestamp(local, 0))
                .ok_or_else(|| FetchError::Malformed(format!("invalid timestamp {ts}")))?
                .date_naive();
            Ok(RawBar {
                date,
                open: value_at(&quote.open, i),
                high: value_at(&quote.high, i),
                low: value_at(&quote.low, i),
                close: value_at(&quote.close, i),
                volume: value_at(&quote.volume, i),
            })
        })
        .collect()
}

#[async_trait]
impl QuoteSource for YahooChartSource {
    #[instrument(
        name = "YahooChartFetch",
        skip(self),
        fields(symbol = %symbol)
    )]
    async fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawBar>, FetchError> {
        let period1 = start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        let period2 = end
            .succ_opt()
            .unwrap_or(end)
            .and_time(chrono::NaiveTime::MIN)
            .and_utc()
            .timestamp();
        let url = format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
            self.base_url, symbol, period1, period2
        );
        debug!("Requesting chart data from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        debug!(%status, "Received Yahoo response");
        match status.as_u16() {
            429 => return Err(FetchError::RateLimited),
            404 => return Err(FetchError::UnknownSymbol(symbol.to_string())),
            code if !status.is_success() => return Err(FetchError::Http(code)),
            _ => {}
        }

        let text = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let data: YahooChartResponse = serde_json::from_str(&text)
            .map_err(|e| FetchError::Malformed(format!("{symbol}: {e}")))?;

        if let Some(error) = data.chart.error {
            return Err(match error.code.as_str() {
                "Not Found" => FetchError::UnknownSymbol(symbol.to_string()),
                _ => FetchError::Malformed(format!(
                    "{}: {}",
                    error.code,
                    error.description.unwrap_or_default()
                )),
            });
        }

        let item = data
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or(FetchError::EmptyPayload)?;
        extract_bars(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    pub async fn create_mock_server(symbol: &str, template: ResponseTemplate) -> MockServer {
        let mock_server = MockServer::start().await;
        let request_path = format!("/v8/finance/chart/{symbol}");

        Mock::given(method("GET"))
            .and(path(request_path))
            .respond_with(template)
            .mount(&mock_server)
            .await;

        mock_server
    }

    fn source(server: &MockServer) -> YahooChartSource {
        YahooChartSource::new(&server.uri(), std::time::Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_successful_bars_fetch() {
        let ts1 = Utc.with_ymd_and_hms(2024, 1, 2, 5, 0, 0).unwrap().timestamp();
        let ts2 = Utc.with_ymd_and_hms(2024, 1, 3, 5, 0, 0).unwrap().timestamp();
        let mock_response = format!(
            r#"{{
                "chart": {{
                    "result": [{{
                        "meta": {{ "currency": "USD", "gmtoffset": -18000 }},
                        "timestamp": [{ts1}, {ts2}],
                        "indicators": {{
                            "quote": [{{
                                "open": [2060.1, 2040.0],
                                "high": [2070.5, 2050.2],
                                "low": [2055.0, 2030.4],
                                "close": [2064.4, null],
                                "volume": [120000, 98000]
                            }}]
                        }}
                    }}],
                    "error": null
                }}
            }}"#
        );

        let server = create_mock_server(
            "GC=F",
            ResponseTemplate::new(200).set_body_string(mock_response),
        )
        .await;

        let bars = source(&server)
            .daily_bars("GC=F", day(1), day(3))
            .await
            .unwrap();

        assert_eq!(bars.len(), 2);
        // 05:00 UTC with a -5h offset is midnight of the same exchange day
        assert_eq!(bars[0].date, day(2));
        assert_eq!(bars[0].close, Some(2064.4));
        assert_eq!(bars[0].high, Some(2070.5));
        assert_eq!(bars[0].volume, Some(120000));
        assert_eq!(bars[1].date, day(3));
        assert_eq!(bars[1].close, None);
    }

    #[tokio::test]
    async fn test_request_carries_window() {
        let server = MockServer::start().await;
        let period1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp();
        let period2 = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap().timestamp();
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/CNY=X"))
            .and(query_param("period1", period1.to_string()))
            .and(query_param("period2", period2.to_string()))
            .and(query_param("interval", "1d"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"chart": {"result": [{"meta": {}, "timestamp": [], "indicators": {"quote": [{}]}}], "error": null}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let result = source(&server).daily_bars("CNY=X", day(1), day(3)).await;
        assert_eq!(result.unwrap_err(), FetchError::EmptyPayload);
    }

    #[tokio::test]
    async fn test_error_statuses_are_classified() {
        let cases = [
            (429, FetchError::RateLimited),
            (404, FetchError::UnknownSymbol("GC=F".to_string())),
            (500, FetchError::Http(500)),
            (403, FetchError::Http(403)),
        ];
        for (status, expected) in cases {
            let server = create_mock_server("GC=F", ResponseTemplate::new(status)).await;
            let err = source(&server)
                .daily_bars("GC=F", day(1), day(3))
                .await
                .unwrap_err();
            assert_eq!(err, expected, "status {status}");
        }
    }

    #[tokio::test]
    async fn test_chart_error_body() {
        let body = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        let server =
            create_mock_server("XXX", ResponseTemplate::new(200).set_body_string(body)).await;

        let err = source(&server)
            .daily_bars("XXX", day(1), day(3))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::UnknownSymbol("XXX".to_string()));
    }

    #[tokio::test]
    async fn test_malformed_and_empty_responses() {
        let server = create_mock_server(
            "GC=F",
            ResponseTemplate::new(200).set_body_string(r#"{"chart": {"results": []}}"#),
        )
        .await;
        let err = source(&server)
            .daily_bars("GC=F", day(1), day(3))
            .await
            .unwrap_err();
        // no "result" key at all decodes as an empty result
        assert_eq!(err, FetchError::EmptyPayload);

        let server = create_mock_server(
            "GC=F",
            ResponseTemplate::new(200).set_body_string("<html>busy</html>"),
        )
        .await;
        let err = source(&server)
            .daily_bars("GC=F", day(1), day(3))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_out_of_range_timestamp_is_malformed() {
        let body = format!(
            r#"{{"chart": {{"result": [{{"meta": {{"gmtoffset": 3600}}, "timestamp": [{}], "indicators": {{"quote": [{{"close": [2000.0]}}]}}}}], "error": null}}}}"#,
            i64::MAX
        );
        let server =
            create_mock_server("GC=F", ResponseTemplate::new(200).set_body_string(body)).await;

        let err = source(&server)
            .daily_bars("GC=F", day(1), day(3))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Malformed(ref m) if m.contains("invalid timestamp")));
    }
}
