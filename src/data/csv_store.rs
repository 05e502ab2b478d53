use crate::optimization::portfolio_service::SeriesSource;
use crate::series::AssetSeries;
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use csv::{Reader, Writer};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// `SYMBOL_YYYY-MM-DD_YYYY-MM-DD.csv`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeriesFileName {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SeriesFileName {
    pub fn new(symbol: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        SeriesFileName {
            symbol: symbol.into(),
            start,
            end,
        }
    }

    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".csv")?;
        let mut parts = stem.rsplitn(3, '_');
        let end = NaiveDate::parse_from_str(parts.next()?, DATE_FORMAT).ok()?;
        let start = NaiveDate::parse_from_str(parts.next()?, DATE_FORMAT).ok()?;
        let symbol = parts.next()?;
        let valid_symbol = !symbol.is_empty()
            && symbol
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        valid_symbol.then(|| SeriesFileName::new(symbol, start, end))
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.csv",
            self.symbol,
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    date: String,
    close: f64,
}

/// Reads a `date,close` file. Timestamps are cut to their date, and the last
/// quote of a day wins.
pub fn read_series(path: &Path, symbol: &str) -> Result<AssetSeries> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = Reader::from_reader(file);

    let mut by_date = BTreeMap::new();
    for (line, row) in reader.deserialize::<PriceRow>().enumerate() {
        let row = row.with_context(|| format!("Malformed row {} in {}", line + 1, path.display()))?;
        let day = row
            .date
            .get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok())
            .with_context(|| format!("Failed to parse date `{}` in {}", row.date, path.display()))?;
        by_date.insert(day, row.close);
    }

    AssetSeries::from_pairs(symbol, by_date)
        .with_context(|| format!("Invalid series in {}", path.display()))
}

pub fn write_series(path: &Path, series: &AssetSeries) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = Writer::from_writer(file);

    writer.write_record(["date", "close"])?;
    for point in series.points() {
        writer.write_record([point.date.format(DATE_FORMAT).to_string(), point.price.to_string()])?;
    }

    writer.flush()?;
    Ok(())
}

/// Series files of a directory, following the naming convention.
pub fn list_series_files(dir: &Path) -> Result<Vec<(SeriesFileName, PathBuf)>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".csv") {
            continue;
        }
        match SeriesFileName::parse(name) {
            Some(parsed) => files.push((parsed, path.clone())),
            None => warn!("File '{}' doesn't match naming convention. Skipped.", name),
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Directory of per-DARWIN CSV files.
#[derive(Debug, Clone)]
pub struct CsvDirectorySource {
    dir: PathBuf,
}

impl CsvDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CsvDirectorySource { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lexically last file per symbol.
    pub fn discover(&self) -> Result<BTreeMap<String, PathBuf>> {
        let mut latest = BTreeMap::new();
        for (name, path) in list_series_files(&self.dir)? {
            // files are sorted, later ones replace earlier ones
            latest.insert(name.symbol, path);
        }
        Ok(latest)
    }
}

impl CsvDirectorySource {
    fn exact_file(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Option<PathBuf> {
        let (start, end) = (start?, end?);
        let path = self
            .dir
            .join(SeriesFileName::new(symbol, start, end).file_name());
        path.is_file().then_some(path)
    }

    fn load_from(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        latest: &Result<BTreeMap<String, PathBuf>>,
    ) -> Result<Option<AssetSeries>> {
        // an exact window match wins over the latest file
        let path = match self.exact_file(symbol, start, end) {
            Some(path) => path,
            None => match latest {
                Ok(latest) => match latest.get(symbol) {
                    Some(path) => path.clone(),
                    None => return Ok(None),
                },
                Err(e) => return Err(anyhow!("{:#}", e)),
            },
        };
        debug!("Loading {} from {}", symbol, path.display());
        read_series(&path, symbol).map(Some)
    }
}

impl SeriesSource for CsvDirectorySource {
    fn available_symbols(&self) -> Result<Vec<String>> {
        Ok(self.discover()?.into_keys().collect())
    }

    fn load(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Option<AssetSeries>> {
        if let Some(path) = self.exact_file(symbol, start, end) {
            debug!("Loading {} from {}", symbol, path.display());
            return read_series(&path, symbol).map(Some);
        }
        self.load_from(symbol, None, None, &self.discover())
    }

    fn load_many(
        &self,
        symbols: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Vec<Result<Option<AssetSeries>>> {
        // the directory is listed once for the whole request
        let latest = self.discover();
        symbols
            .iter()
            .map(|symbol| self.load_from(symbol, start, end, &latest))
            .collect()
    }
}
