use chrono::NaiveDate;
use nalgebra::DMatrix;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SeriesError {
    #[error("Dates of `{symbol}` are not strictly increasing at {date}")]
    UnorderedDates { symbol: String, date: NaiveDate },
    #[error("Price of `{symbol}` on {date} is not a positive finite number: {price}")]
    InvalidPrice {
        symbol: String,
        date: NaiveDate,
        price: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

/// Daily price history of one DARWIN.
///
/// Dates are unique and strictly increasing, prices are finite and positive.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetSeries {
    symbol: String,
    points: Vec<PricePoint>,
}

impl AssetSeries {
    pub fn new(symbol: impl Into<String>, points: Vec<PricePoint>) -> Result<Self, SeriesError> {
        let symbol = symbol.into();
        for (i, point) in points.iter().enumerate() {
            if !point.price.is_finite() || point.price <= 0.0 {
                return Err(SeriesError::InvalidPrice {
                    symbol,
                    date: point.date,
                    price: point.price,
                });
            }
            if i > 0 && point.date <= points[i - 1].date {
                return Err(SeriesError::UnorderedDates {
                    symbol,
                    date: point.date,
                });
            }
        }
        Ok(AssetSeries { symbol, points })
    }

    pub fn from_pairs(
        symbol: impl Into<String>,
        pairs: impl IntoIterator<Item = (NaiveDate, f64)>,
    ) -> Result<Self, SeriesError> {
        let points = pairs
            .into_iter()
            .map(|(date, price)| PricePoint { date, price })
            .collect();
        AssetSeries::new(symbol, points)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&PricePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price).collect()
    }

    /// `r_t = price_t / price_{t-1} - 1`, one value less than there are prices.
    pub fn daily_returns(&self) -> Vec<f64> {
        self.points
            .windows(2)
            .map(|pair| pair[1].price / pair[0].price - 1.0)
            .collect()
    }

    /// Daily returns keyed by the date on which they are realized.
    pub fn dated_returns(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.points
            .windows(2)
            .map(|pair| (pair[1].date, pair[1].price / pair[0].price - 1.0))
    }

    /// Days between the first and last observation.
    pub fn calendar_span_days(&self) -> i64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (last.date - first.date).num_days(),
            _ => 0,
        }
    }

    /// Keeps only the observations inside the inclusive `[start, end]` window.
    pub fn window(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> AssetSeries {
        let points = self
            .points
            .iter()
            .filter(|p| start.map_or(true, |s| p.date >= s) && end.map_or(true, |e| p.date <= e))
            .copied()
            .collect();
        AssetSeries {
            symbol: self.symbol.clone(),
            points,
        }
    }

    /// Rebuilds the price path from the first price and a replacement return sequence.
    ///
    /// The dates of the current series are kept, `returns[i]` moves the price
    /// from observation `i` to observation `i + 1`.
    pub fn rebuild(&self, returns: &[f64]) -> Result<AssetSeries, SeriesError> {
        let Some(first) = self.points.first() else {
            return Ok(self.clone());
        };
        let mut price = first.price;
        let mut points = Vec::with_capacity(self.points.len());
        points.push(*first);
        for (point, r) in self.points.iter().skip(1).zip(returns) {
            price *= 1.0 + r;
            points.push(PricePoint {
                date: point.date,
                price,
            });
        }
        AssetSeries::new(self.symbol.clone(), points)
    }
}

/// Daily returns of several assets aligned on a shared date axis.
///
/// Columns follow the lexical order of the symbols. Rows are the union of the
/// return dates of every member; an asset without an observation on a row's
/// date contributes a zero return there.
#[derive(Debug, Clone)]
pub struct ReturnsPanel {
    symbols: Vec<String>,
    dates: Vec<NaiveDate>,
    returns: DMatrix<f64>,
}

impl ReturnsPanel {
    pub fn from_series(series: &[AssetSeries]) -> Self {
        let mut ordered: Vec<&AssetSeries> = series.iter().collect();
        ordered.sort_by(|a, b| a.symbol().cmp(b.symbol()));

        let dates: Vec<NaiveDate> = ordered
            .iter()
            .flat_map(|s| s.points().iter().skip(1).map(|p| p.date))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut returns = DMatrix::zeros(dates.len(), ordered.len());
        for (column, asset) in ordered.iter().enumerate() {
            for (date, r) in asset.dated_returns() {
                if let Ok(row) = dates.binary_search(&date) {
                    returns[(row, column)] = r;
                }
            }
        }

        ReturnsPanel {
            symbols: ordered.iter().map(|s| s.symbol().to_string()).collect(),
            dates,
            returns,
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn returns(&self) -> &DMatrix<f64> {
        &self.returns
    }

    pub fn asset_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn period_count(&self) -> usize {
        self.dates.len()
    }

    /// `T x k` matrix holding only the given asset columns.
    pub fn select(&self, indices: &[usize]) -> DMatrix<f64> {
        self.returns.select_columns(indices)
    }

    /// Weighted daily return of the given assets, scaled by `leverage`.
    pub fn blend(&self, indices: &[usize], weights: &[f64], leverage: f64) -> Vec<f64> {
        (0..self.returns.nrows())
            .map(|t| {
                leverage
                    * indices
                        .iter()
                        .zip(weights)
                        .map(|(&j, &w)| w * self.returns[(t, j)])
                        .sum::<f64>()
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::Days;

    pub fn day(offset: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 1, 1)
            .and_then(|d| d.checked_add_days(Days::new(offset as u64)))
            .unwrap()
    }

    /// Series starting at 100 on 2022-01-01 and compounding `returns` daily.
    pub fn series_from_returns(symbol: &str, returns: &[f64]) -> AssetSeries {
        let mut price = 100.0;
        let mut pairs = vec![(day(0), price)];
        for (i, r) in returns.iter().enumerate() {
            price *= 1.0 + r;
            pairs.push((day(i + 1), price));
        }
        AssetSeries::from_pairs(symbol, pairs).unwrap()
    }

    /// Constant-rate series with `days` observations.
    pub fn flat_series(symbol: &str, daily_rate: f64, days: usize) -> AssetSeries {
        series_from_returns(symbol, &vec![daily_rate; days.saturating_sub(1)])
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_new_rejects_unordered_and_duplicate_dates() {
        let duplicate = AssetSeries::from_pairs("ABC", vec![(day(0), 1.0), (day(0), 1.1)]);
        assert!(matches!(
            duplicate,
            Err(SeriesError::UnorderedDates { .. })
        ));

        let unordered = AssetSeries::from_pairs("ABC", vec![(day(2), 1.0), (day(1), 1.1)]);
        assert!(matches!(
            unordered,
            Err(SeriesError::UnorderedDates { .. })
        ));
    }

    #[test]
    fn test_new_rejects_non_positive_prices() {
        let result = AssetSeries::from_pairs("ABC", vec![(day(0), 1.0), (day(1), 0.0)]);
        assert!(matches!(result, Err(SeriesError::InvalidPrice { .. })));
    }

    #[test]
    fn test_daily_returns_has_one_less_value() {
        let series =
            AssetSeries::from_pairs("ABC", vec![(day(0), 100.0), (day(1), 110.0), (day(2), 99.0)])
                .unwrap();
        let returns = series.daily_returns();
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.1).abs() < 1e-12);
        assert!((returns[1] + 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_window_is_inclusive() {
        let series = flat_series("ABC", 0.001, 10);
        let clipped = series.window(Some(day(2)), Some(day(5)));
        assert_eq!(clipped.len(), 4);
        assert_eq!(clipped.first().unwrap().date, day(2));
        assert_eq!(clipped.last().unwrap().date, day(5));
    }

    #[test]
    fn test_rebuild_keeps_dates_and_first_price() {
        let series = flat_series("ABC", 0.01, 4);
        let rebuilt = series.rebuild(&[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(rebuilt.len(), 4);
        for point in rebuilt.points() {
            assert!((point.price - 100.0).abs() < 1e-12);
        }
        assert_eq!(rebuilt.last().unwrap().date, series.last().unwrap().date);
    }

    #[test]
    fn test_panel_aligns_on_union_of_dates_and_fills_zero() {
        let long = series_from_returns("ZZZ", &[0.01, 0.02, 0.03]);
        // Only the two last dates of the long series.
        let short = AssetSeries::from_pairs(
            "AAA",
            vec![(day(1), 10.0), (day(2), 11.0), (day(3), 11.0)],
        )
        .unwrap();

        let panel = ReturnsPanel::from_series(&[long, short]);
        assert_eq!(panel.symbols(), &["AAA".to_string(), "ZZZ".to_string()]);
        assert_eq!(panel.period_count(), 3);
        // AAA has no return on day 1.
        assert_eq!(panel.returns()[(0, 0)], 0.0);
        assert!((panel.returns()[(1, 0)] - 0.1).abs() < 1e-12);
        assert!((panel.returns()[(2, 1)] - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_blend_applies_weights_and_leverage() {
        let a = series_from_returns("A", &[0.01, 0.02]);
        let b = series_from_returns("B", &[0.03, -0.02]);
        let panel = ReturnsPanel::from_series(&[a, b]);

        let blended = panel.blend(&[0, 1], &[0.5, 0.5], 2.0);
        assert!((blended[0] - 0.04).abs() < 1e-12);
        assert!(blended[1].abs() < 1e-12);
    }
}
