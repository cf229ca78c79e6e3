use std::collections::BTreeMap;

use serde::Deserialize;

use super::error::SimError;
use super::types::AssetBucket;

pub const DEFAULT_CAPE: f64 = 25.0;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnPoint {
    pub year: i32,
    pub return_pct: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InflationPoint {
    pub year: i32,
    pub inflation_pct: f64,
}

/// On-disk / on-wire shape of the historical datasets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SeriesFile {
    #[serde(alias = "equity_a")]
    pub equity_a: Vec<ReturnPoint>,
    #[serde(alias = "equity_b")]
    pub equity_b: Vec<ReturnPoint>,
    pub alternative: Vec<ReturnPoint>,
    pub bond: Vec<ReturnPoint>,
    pub inflation: Vec<InflationPoint>,
    pub cape: BTreeMap<i32, f64>,
}

/// `year -> percent` table, chronological by construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReturnSeries {
    values: BTreeMap<i32, f64>,
}

impl ReturnSeries {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (i32, f64)>) -> Self {
        Self {
            values: pairs.into_iter().collect(),
        }
    }

    pub fn get(&self, year: i32) -> Option<f64> {
        self.values.get(&year).copied()
    }

    pub fn years(&self) -> Vec<i32> {
        self.values.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn min_year(&self) -> Option<i32> {
        self.values.keys().next().copied()
    }

    pub fn max_year(&self) -> Option<i32> {
        self.values.keys().next_back().copied()
    }

    pub fn span(&self) -> Option<i32> {
        Some(self.max_year()? - self.min_year()? + 1)
    }

    /// Maps any year into this series' own range by cycling its history.
    pub fn wrapped_year(&self, year: i32) -> Option<i32> {
        let min = self.min_year()?;
        let span = self.span()?;
        Some(min + (year - min).rem_euclid(span))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesStore {
    pub equity_a: ReturnSeries,
    pub equity_b: ReturnSeries,
    pub alternative: ReturnSeries,
    pub bond: ReturnSeries,
    pub inflation: ReturnSeries,
    pub cape: BTreeMap<i32, f64>,
}

impl From<SeriesFile> for SeriesStore {
    fn from(file: SeriesFile) -> Self {
        let returns = |points: Vec<ReturnPoint>| {
            ReturnSeries::from_pairs(points.into_iter().map(|p| (p.year, p.return_pct)))
        };
        Self {
            equity_a: returns(file.equity_a),
            equity_b: returns(file.equity_b),
            alternative: returns(file.alternative),
            bond: returns(file.bond),
            inflation: ReturnSeries::from_pairs(
                file.inflation.into_iter().map(|p| (p.year, p.inflation_pct)),
            ),
            cape: file.cape,
        }
    }
}

impl SeriesStore {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<SeriesFile>(json).map(Self::from)
    }

    pub fn series(&self, asset: AssetBucket) -> Option<&ReturnSeries> {
        match asset {
            AssetBucket::Cash => None,
            AssetBucket::EquityA => Some(&self.equity_a),
            AssetBucket::EquityB => Some(&self.equity_b),
            AssetBucket::Alternative => Some(&self.alternative),
            AssetBucket::Bond => Some(&self.bond),
        }
    }

    /// Sorted years on which every asset in `assets` has data. The alternative
    /// asset wraps its own history and never narrows the window.
    pub fn common_years(&self, assets: &[AssetBucket]) -> Result<Vec<i32>, SimError> {
        let mut window: Option<Vec<i32>> = None;
        for asset in assets {
            let Some(series) = self.series(*asset) else {
                continue;
            };
            if series.is_empty() {
                return Err(SimError::EmptySeries { asset: *asset });
            }
            if *asset == AssetBucket::Alternative {
                continue;
            }
            window = Some(match window {
                None => series.years(),
                Some(years) => years
                    .into_iter()
                    .filter(|year| series.get(*year).is_some())
                    .collect(),
            });
        }

        let years = match window {
            Some(years) => years,
            None if assets.contains(&AssetBucket::Alternative) => self.alternative.years(),
            None => return Err(SimError::NoCommonYears),
        };
        if years.is_empty() {
            return Err(SimError::NoCommonYears);
        }
        Ok(years)
    }

    pub fn percent_return(&self, asset: AssetBucket, year: i32) -> Result<f64, SimError> {
        let Some(series) = self.series(asset) else {
            return Ok(0.0);
        };
        let lookup_year = if asset == AssetBucket::Alternative {
            series
                .wrapped_year(year)
                .ok_or(SimError::EmptySeries { asset })?
        } else {
            year
        };
        series
            .get(lookup_year)
            .ok_or(SimError::MissingReturn { asset, year })
    }

    pub fn multiplier(&self, asset: AssetBucket, year: i32) -> Result<f64, SimError> {
        Ok(1.0 + self.percent_return(asset, year)? / 100.0)
    }

    /// Inflation for a calendar year as a fraction; missing years are zero.
    pub fn inflation_rate(&self, year: i32) -> f64 {
        self.inflation.get(year).unwrap_or(0.0) / 100.0
    }

    pub fn cape(&self, year: i32) -> f64 {
        self.cape.get(&year).copied().unwrap_or(DEFAULT_CAPE)
    }
}
