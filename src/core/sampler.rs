use rand::Rng;
use rand::seq::SliceRandom;

use super::error::SimError;
use super::series::SeriesStore;
use super::types::{AssetBucket, InflationSource, ReturnPath, SamplingMode, YearReturns};

/// Draws the calendar year used for each simulated year of one run. Every
/// asset of the run is later looked up by this same sequence.
pub fn sample_years<R: Rng + ?Sized>(
    mode: SamplingMode,
    horizon: u32,
    years: &[i32],
    start_year: i32,
    rng: &mut R,
) -> Result<Vec<i32>, SimError> {
    if horizon == 0 {
        return Err(SimError::InvalidHorizon);
    }
    if years.is_empty() {
        return Err(SimError::NoCommonYears);
    }

    let n = years.len();
    let horizon = horizon as usize;
    let sampled = match mode {
        SamplingMode::ActualSequence => {
            let start = years
                .iter()
                .position(|year| *year == start_year)
                .filter(|idx| idx + horizon <= n)
                .ok_or(SimError::StartYearOutOfRange {
                    start_year,
                    horizon: horizon as u32,
                })?;
            years[start..start + horizon].to_vec()
        }
        SamplingMode::ActualSequenceRandomStart => {
            let start = rng.gen_range(0..n);
            (0..horizon).map(|i| years[(start + i) % n]).collect()
        }
        SamplingMode::RandomShuffle => {
            let mut permutation = years.to_vec();
            permutation.shuffle(rng);
            (0..horizon).map(|i| permutation[i % n]).collect()
        }
        SamplingMode::Bootstrap => (0..horizon).map(|_| years[rng.gen_range(0..n)]).collect(),
    };
    Ok(sampled)
}

/// Latest start year that still fits a full `horizon` window, with the
/// requested year pulled into range. `None` when the data is shorter than the
/// horizon.
pub fn clamp_start_year(years: &[i32], start_year: i32, horizon: u32) -> Option<i32> {
    let horizon = horizon.max(1) as usize;
    if years.len() < horizon {
        return None;
    }
    let latest = years[years.len() - horizon];
    let wanted = start_year.clamp(years[0], latest);
    years.iter().copied().find(|year| *year >= wanted)
}

pub fn build_path(
    store: &SeriesStore,
    assets: &[AssetBucket],
    sampled_years: &[i32],
    inflation: InflationSource,
) -> Result<ReturnPath, SimError> {
    let lookup = |bucket: AssetBucket, year: i32| -> Result<f64, SimError> {
        if assets.contains(&bucket) {
            store.multiplier(bucket, year)
        } else {
            Ok(1.0)
        }
    };

    let mut years = Vec::with_capacity(sampled_years.len());
    for &year in sampled_years {
        years.push(YearReturns {
            year,
            equity_a: lookup(AssetBucket::EquityA, year)?,
            equity_b: lookup(AssetBucket::EquityB, year)?,
            alternative: lookup(AssetBucket::Alternative, year)?,
            bond: lookup(AssetBucket::Bond, year)?,
            inflation: match inflation {
                InflationSource::Flat(rate) => rate,
                InflationSource::Historical => store.inflation_rate(year),
            },
            cape: store.cape(year),
        });
    }
    Ok(ReturnPath { years })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::series::ReturnSeries;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::{BTreeMap, HashSet};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn ten_years() -> Vec<i32> {
        (2000..2010).collect()
    }

    fn is_cyclic_window(sampled: &[i32], years: &[i32]) -> bool {
        let n = years.len();
        let Some(start) = years.iter().position(|y| *y == sampled[0]) else {
            return false;
        };
        sampled
            .iter()
            .enumerate()
            .all(|(i, year)| *year == years[(start + i) % n])
    }

    #[test]
    fn actual_sequence_takes_consecutive_years() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let sampled =
            sample_years(SamplingMode::ActualSequence, 4, &ten_years(), 2003, &mut rng).unwrap();
        assert_eq!(sampled, vec![2003, 2004, 2005, 2006]);
    }

    #[test]
    fn actual_sequence_rejects_window_past_the_end() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = sample_years(SamplingMode::ActualSequence, 5, &ten_years(), 2007, &mut rng)
            .expect_err("window runs past 2009");
        assert_eq!(
            err,
            SimError::StartYearOutOfRange {
                start_year: 2007,
                horizon: 5
            }
        );
        assert!(
            sample_years(SamplingMode::ActualSequence, 2, &ten_years(), 1990, &mut rng).is_err()
        );
    }

    #[test]
    fn clamp_start_year_keeps_window_in_range() {
        let years = ten_years();
        assert_eq!(clamp_start_year(&years, 2007, 5), Some(2005));
        assert_eq!(clamp_start_year(&years, 1990, 5), Some(2000));
        assert_eq!(clamp_start_year(&years, 2002, 5), Some(2002));
        assert_eq!(clamp_start_year(&years, 2002, 11), None);
    }

    #[test]
    fn random_start_wraps_around_the_year_list() {
        let years = ten_years();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut saw_wrap = false;
        for _ in 0..200 {
            let sampled = sample_years(
                SamplingMode::ActualSequenceRandomStart,
                7,
                &years,
                0,
                &mut rng,
            )
            .unwrap();
            assert_eq!(sampled.len(), 7);
            assert!(is_cyclic_window(&sampled, &years), "{sampled:?}");
            saw_wrap |= sampled.windows(2).any(|w| w[1] < w[0]);
        }
        assert!(saw_wrap);
    }

    #[test]
    fn shuffle_is_a_permutation_prefix() {
        let years = ten_years();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let sampled = sample_years(SamplingMode::RandomShuffle, 6, &years, 0, &mut rng).unwrap();
        let distinct: HashSet<i32> = sampled.iter().copied().collect();
        assert_eq!(sampled.len(), 6);
        assert_eq!(distinct.len(), 6);
        assert!(sampled.iter().all(|y| years.contains(y)));
    }

    #[test]
    fn shuffle_longer_than_history_repeats_the_permutation() {
        let years = ten_years();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let sampled = sample_years(SamplingMode::RandomShuffle, 25, &years, 0, &mut rng).unwrap();
        let first: HashSet<i32> = sampled[..10].iter().copied().collect();
        assert_eq!(first.len(), 10);
        for i in 10..25 {
            assert_eq!(sampled[i], sampled[i - 10]);
        }
    }

    #[test]
    fn bootstrap_draws_are_uniform_over_the_window() {
        let years = ten_years();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut counts = BTreeMap::<i32, usize>::new();
        let batches = 20_000;
        for _ in 0..batches {
            let sampled = sample_years(SamplingMode::Bootstrap, 5, &years, 0, &mut rng).unwrap();
            assert_eq!(sampled.len(), 5);
            for year in sampled {
                *counts.entry(year).or_default() += 1;
            }
        }
        let total = (batches * 5) as f64;
        assert_eq!(counts.len(), 10);
        for (year, count) in counts {
            let freq = count as f64 / total;
            assert!((freq - 0.1).abs() < 0.01, "{year} drawn with frequency {freq}");
        }
    }

    #[test]
    fn zero_horizon_and_empty_years_are_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            sample_years(SamplingMode::Bootstrap, 0, &ten_years(), 0, &mut rng),
            Err(SimError::InvalidHorizon)
        );
        assert_eq!(
            sample_years(SamplingMode::Bootstrap, 3, &[], 0, &mut rng),
            Err(SimError::NoCommonYears)
        );
    }

    fn linked_store() -> SeriesStore {
        SeriesStore {
            equity_a: ReturnSeries::from_pairs((2000..2010).map(|y| (y, (y - 2000) as f64))),
            equity_b: ReturnSeries::from_pairs((2000..2010).map(|y| (y, 2.0 * (y - 2000) as f64))),
            alternative: ReturnSeries::from_pairs([(2005, 50.0), (2006, -10.0)]),
            bond: ReturnSeries::default(),
            inflation: ReturnSeries::from_pairs((2000..2005).map(|y| (y, (y - 2000) as f64))),
            cape: BTreeMap::new(),
        }
    }

    #[test]
    fn build_path_looks_up_every_asset_by_the_same_year() {
        let store = linked_store();
        let assets = [
            AssetBucket::EquityA,
            AssetBucket::EquityB,
            AssetBucket::Alternative,
        ];
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let years = store.common_years(&assets).unwrap();
        let sampled = sample_years(SamplingMode::Bootstrap, 30, &years, 0, &mut rng).unwrap();
        let path = build_path(&store, &assets, &sampled, InflationSource::Historical).unwrap();

        assert_eq!(path.sampled_years(), sampled);
        for year in &path.years {
            let offset = (year.year - 2000) as f64;
            assert_approx(year.equity_a, 1.0 + offset / 100.0);
            assert_approx(year.equity_b, 1.0 + 2.0 * offset / 100.0);
            let expected_alt = if year.year % 2 == 1 { 1.5 } else { 0.9 };
            assert_approx(year.alternative, expected_alt);
            assert_approx(year.bond, 1.0);
            let expected_inflation = if year.year < 2005 { offset / 100.0 } else { 0.0 };
            assert_approx(year.inflation, expected_inflation);
        }
    }

    #[test]
    fn build_path_uses_flat_inflation_when_requested() {
        let store = linked_store();
        let path = build_path(
            &store,
            &[AssetBucket::EquityA],
            &[2001, 2002],
            InflationSource::Flat(0.03),
        )
        .unwrap();
        assert!(path.years.iter().all(|y| y.inflation == 0.03));
    }

    #[test]
    fn build_path_fails_fast_on_missing_required_year() {
        let store = linked_store();
        let err = build_path(
            &store,
            &[AssetBucket::EquityA],
            &[2015],
            InflationSource::Flat(0.0),
        )
        .expect_err("2015 not in equity data");
        assert_eq!(
            err,
            SimError::MissingReturn {
                asset: AssetBucket::EquityA,
                year: 2015
            }
        );
    }
}
