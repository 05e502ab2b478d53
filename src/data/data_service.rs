use crate::data::csv_store::{write_series, SeriesFileName};
use crate::data::info_api_client::QuoteFetcher;
use crate::series::AssetSeries;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Turns raw `(timestamp_ms, quote)` pairs into one quote per UTC day,
/// keeping the latest quote of each day.
pub fn quotes_to_daily(raw: &[(i64, f64)]) -> Vec<(NaiveDate, f64)> {
    let mut ordered = raw.to_vec();
    ordered.sort_by_key(|(timestamp, _)| *timestamp);
    let mut by_day = BTreeMap::new();
    for (timestamp, quote) in ordered {
        match DateTime::from_timestamp_millis(timestamp) {
            Some(instant) => {
                by_day.insert(instant.date_naive(), quote);
            }
            None => warn!("Dropping quote with out-of-range timestamp {}", timestamp),
        }
    }
    by_day.into_iter().collect()
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DownloadSummary {
    pub saved: Vec<PathBuf>,
    pub empty: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Downloads DARWIN quotes and stores them as CSV files.
pub struct DataService<F: QuoteFetcher> {
    fetcher: F,
    max_concurrent: usize,
}

impl<F: QuoteFetcher> DataService<F> {
    pub fn new(fetcher: F, max_concurrent: usize) -> Self {
        DataService {
            fetcher,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Ordered daily `(date, price)` pairs of `symbol` between `start` and `end`.
    pub async fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>> {
        let raw = self.fetcher.get_quotes(symbol, start, end).await?;
        Ok(quotes_to_daily(&raw))
    }

    /// Fetches every symbol with bounded concurrency and writes
    /// `SYMBOL_start_end.csv` files into `save_dir`. A failing symbol never
    /// stops the others.
    pub async fn fetch_and_save_quotes(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        save_dir: &Path,
    ) -> Result<DownloadSummary> {
        fs::create_dir_all(save_dir)
            .with_context(|| format!("Failed to create {}", save_dir.display()))?;

        let downloads = stream::iter(symbols)
            .map(|symbol| async move { (symbol, self.fetch(symbol, start, end).await) })
            .buffered(self.max_concurrent)
            .collect::<Vec<_>>()
            .await;

        let mut summary = DownloadSummary::default();
        for (symbol, outcome) in downloads {
            let points = match outcome {
                Ok(points) => points,
                Err(e) => {
                    error!("Could not download data for {}: {:#}", symbol, e);
                    summary.failed.push((symbol.clone(), format!("{:#}", e)));
                    continue;
                }
            };
            if points.is_empty() {
                warn!(
                    "No data returned for {} in {} -> {}. Skipped.",
                    symbol, start, end
                );
                summary.empty.push(symbol.clone());
                continue;
            }
            let series = match AssetSeries::from_pairs(symbol.as_str(), points) {
                Ok(series) => series,
                Err(e) => {
                    error!("Invalid quotes for {}: {}", symbol, e);
                    summary.failed.push((symbol.clone(), e.to_string()));
                    continue;
                }
            };
            let path = save_dir.join(SeriesFileName::new(symbol.as_str(), start, end).file_name());
            write_series(&path, &series)?;
            info!("Saved data to: {}", path.display());
            summary.saved.push(path);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::csv_store::read_series;
    use crate::data::info_api_client::date_to_epoch_ms;
    use anyhow::anyhow;
    use tempfile::tempdir;

    const DAY_MS: i64 = 86_400_000;

    struct FakeFetcher;

    impl QuoteFetcher for FakeFetcher {
        async fn get_quotes(
            &self,
            symbol: &str,
            start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<(i64, f64)>> {
            let base = date_to_epoch_ms(start);
            match symbol {
                "GOOD" => Ok(vec![
                    (base + DAY_MS, 101.),
                    (base, 100.),
                    (base + DAY_MS + 3_600_000, 102.),
                    (base + 2 * DAY_MS, 103.),
                ]),
                "EMPTY" => Ok(vec![]),
                _ => Err(anyhow!("404 Not Found")),
            }
        }
    }

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 1, day).unwrap()
    }

    #[test]
    fn test_quotes_to_daily_keeps_last_quote_per_day() {
        let base = date_to_epoch_ms(jan(1));
        let daily = quotes_to_daily(&[(base + DAY_MS + 10, 2.), (base, 1.), (base + DAY_MS + 20, 3.)]);
        assert_eq!(daily, vec![(jan(1), 1.), (jan(2), 3.)]);
    }

    #[tokio::test]
    async fn test_fetch_and_save_quotes() {
        let dir = tempdir().unwrap();
        let service = DataService::new(FakeFetcher, 2);
        let symbols = vec!["GOOD".to_string(), "EMPTY".to_string(), "MISSING".to_string()];

        let summary = service
            .fetch_and_save_quotes(&symbols, jan(1), jan(31), dir.path())
            .await
            .unwrap();

        assert_eq!(summary.empty, vec!["EMPTY".to_string()]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "MISSING");
        assert_eq!(
            summary.saved,
            vec![dir.path().join("GOOD_2022-01-01_2022-01-31.csv")]
        );

        let saved = read_series(&summary.saved[0], "GOOD").unwrap();
        assert_eq!(saved.prices(), vec![100., 102., 103.]);
    }
}
