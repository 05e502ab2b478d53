use crate::data::csv_store::{read_series, write_series, SeriesFileName};
use crate::series::{AssetSeries, SeriesError};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, PartialEq)]
pub enum FeeError {
    #[error("Fee rate must be within [0, 1), got {0}")]
    InvalidFeeRate(f64),
}

/// Removes a performance fee from the positive daily returns of a series.
///
/// Returns are taken from the raw prices, every positive return is scaled by
/// `1 - fee_rate`, and prices are rebuilt from the first raw price.
pub fn adjust(raw: &AssetSeries, fee_rate: f64) -> Result<AssetSeries, SeriesError> {
    let adjusted = raw
        .daily_returns()
        .into_iter()
        .map(|r| if r > 0. { r * (1. - fee_rate) } else { r })
        .collect::<Vec<f64>>();
    raw.rebuild(&adjusted)
}

#[derive(Debug, Clone, Copy)]
pub struct FeesPreprocessor {
    fee_rate: f64,
}

impl FeesPreprocessor {
    pub fn new(fee_rate: f64) -> Result<Self, FeeError> {
        if !(0. ..1.).contains(&fee_rate) {
            return Err(FeeError::InvalidFeeRate(fee_rate));
        }
        Ok(FeesPreprocessor { fee_rate })
    }

    pub fn fee_rate(&self) -> f64 {
        self.fee_rate
    }

    pub fn adjust(&self, raw: &AssetSeries) -> Result<AssetSeries, SeriesError> {
        adjust(raw, self.fee_rate)
    }

    /// Adjusts every CSV of `raw_dir` and writes it under the same name into
    /// `processed_dir`. Returns how many files were written.
    pub fn process_all_files(&self, raw_dir: &Path, processed_dir: &Path) -> Result<usize> {
        fs::create_dir_all(processed_dir)
            .with_context(|| format!("Failed to create {}", processed_dir.display()))?;

        let mut names = fs::read_dir(raw_dir)
            .with_context(|| format!("Failed to read directory {}", raw_dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(".csv"))
            .collect::<Vec<_>>();
        names.sort();

        let mut written = 0;
        for name in names {
            let symbol = SeriesFileName::parse(&name)
                .map(|n| n.symbol)
                .unwrap_or_else(|| name.trim_end_matches(".csv").to_string());
            let raw = match read_series(&raw_dir.join(&name), &symbol) {
                Ok(series) => series,
                Err(e) => {
                    warn!("Could not read {}: {:#}. Skipped.", name, e);
                    continue;
                }
            };
            if raw.len() < 2 {
                warn!("Not enough data in {}. Skipped.", name);
                continue;
            }
            let processed = self
                .adjust(&raw)
                .with_context(|| format!("Fee adjustment produced an invalid series for {}", name))?;
            let out = processed_dir.join(&name);
            write_series(&out, &processed)?;
            info!("Fees processed for {}, new file: {}", name, out.display());
            written += 1;
        }
        Ok(written)
    }
}
