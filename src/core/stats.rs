use super::types::{
    AssetBucket, DrawdownStats, MedianRun, PercentileBand, PortfolioState, RunDrawdown,
    RunResult, SimulationStats,
};

/// Fraction of runs that never depleted.
pub fn success_rate(runs: &[RunResult]) -> f64 {
    if runs.is_empty() {
        return 0.0;
    }
    let successes = runs.iter().filter(|run| run.succeeded()).count();
    successes as f64 / runs.len() as f64
}

/// Linear-interpolation percentile (R type 7). `p` is in percent.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    percentile(&mut values, 50.0)
}

fn step_count(runs: &[RunResult]) -> usize {
    runs.iter().map(|run| run.balances.len()).max().unwrap_or(0)
}

fn column(runs: &[RunResult], step: usize, value: impl Fn(&PortfolioState) -> f64) -> Vec<f64> {
    runs.iter()
        .map(|run| run.balances.get(step).map(&value).unwrap_or(0.0))
        .collect()
}

pub fn percentile_bands(runs: &[RunResult]) -> Vec<PercentileBand> {
    (0..step_count(runs))
        .map(|step| {
            let mut totals = column(runs, step, PortfolioState::total);
            PercentileBand {
                step: step as u32,
                p10: percentile(&mut totals, 10.0),
                p25: percentile(&mut totals, 25.0),
                p50: percentile(&mut totals, 50.0),
                p75: percentile(&mut totals, 75.0),
                p90: percentile(&mut totals, 90.0),
            }
        })
        .collect()
}

/// Per-step medians of the total, each bucket and the withdrawals. Each step
/// is taken independently, so the result is not any single run's trajectory.
pub fn median_run(runs: &[RunResult]) -> MedianRun {
    let steps = step_count(runs);
    let mut out = MedianRun::default();

    for step in 0..steps {
        out.totals.push(median(column(runs, step, PortfolioState::total)));

        let mut balance = PortfolioState::zero();
        for bucket in AssetBucket::ALL {
            *balance.get_mut(bucket) = median(column(runs, step, |state| state.get(bucket)));
        }
        out.balances.push(balance);
    }

    let withdrawal_steps = runs.iter().map(|run| run.withdrawals.len()).max().unwrap_or(0);
    for step in 0..withdrawal_steps {
        let values = runs
            .iter()
            .map(|run| run.withdrawals.get(step).copied().unwrap_or(0.0))
            .collect();
        out.withdrawals.push(median(values));
    }

    out
}

/// Largest peak-to-trough decline of one run's total balance, and the total
/// at the trough of that decline.
pub fn run_drawdown(totals: &[f64]) -> RunDrawdown {
    let Some(first) = totals.first() else {
        return RunDrawdown::default();
    };

    let mut peak = *first;
    let mut result = RunDrawdown {
        max_drawdown: 0.0,
        low_point: *first,
    };
    for &balance in totals {
        peak = peak.max(balance);
        let drawdown = if peak > 0.0 {
            (peak - balance) / peak
        } else {
            0.0
        };
        if drawdown > result.max_drawdown {
            result = RunDrawdown {
                max_drawdown: drawdown,
                low_point: balance,
            };
        }
    }
    result
}

pub fn drawdown_stats(runs: &[RunResult]) -> DrawdownStats {
    if runs.is_empty() {
        return DrawdownStats::default();
    }

    let per_run: Vec<RunDrawdown> = runs.iter().map(|run| run_drawdown(&run.totals())).collect();
    let drawdowns: Vec<f64> = per_run.iter().map(|d| d.max_drawdown).collect();
    let lows: Vec<f64> = per_run.iter().map(|d| d.low_point).collect();

    DrawdownStats {
        worst_max_drawdown: drawdowns.iter().copied().fold(0.0, f64::max),
        lowest_low_point: lows.iter().copied().fold(f64::INFINITY, f64::min),
        median_max_drawdown: median(drawdowns),
        median_low_point: median(lows),
    }
}

pub fn summarize(runs: &[RunResult]) -> SimulationStats {
    SimulationStats {
        run_count: runs.len(),
        success_rate: success_rate(runs),
        percentile_bands: percentile_bands(runs),
        median_run: median_run(runs),
        drawdown: drawdown_stats(runs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn equity_run(totals: &[f64], withdrawals: &[f64], failed_year: Option<u32>) -> RunResult {
        RunResult {
            balances: totals
                .iter()
                .map(|total| PortfolioState {
                    equity_a: *total,
                    ..PortfolioState::zero()
                })
                .collect(),
            withdrawals: withdrawals.to_vec(),
            failed_year,
            sampled_years: Vec::new(),
            guardrail_events: Vec::new(),
        }
    }

    #[test]
    fn percentile_interpolates_between_points() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_approx(percentile(&mut values, 25.0), 1.75);
        assert_approx(percentile(&mut values, 50.0), 2.5);
        assert_approx(percentile(&mut values, 0.0), 1.0);
        assert_approx(percentile(&mut values, 100.0), 4.0);
        assert_approx(percentile(&mut [], 50.0), 0.0);
        assert_approx(percentile(&mut [7.0], 90.0), 7.0);
    }

    #[test]
    fn success_rate_counts_runs_without_failure() {
        let runs = vec![
            equity_run(&[1.0, 1.0], &[0.0], None),
            equity_run(&[1.0, 0.0], &[1.0], Some(1)),
            equity_run(&[1.0, 1.0], &[0.0], None),
            equity_run(&[1.0, 1.0], &[0.0], None),
        ];
        assert_approx(success_rate(&runs), 0.75);
        assert_approx(success_rate(&[]), 0.0);
    }

    #[test]
    fn bands_cover_every_step_and_are_ordered() {
        let runs: Vec<RunResult> = (1..=10)
            .map(|i| {
                let i = i as f64;
                equity_run(&[100.0, 100.0 + i, 100.0 + 2.0 * i], &[0.0, 0.0], None)
            })
            .collect();
        let bands = percentile_bands(&runs);
        assert_eq!(bands.len(), 3);
        assert_approx(bands[0].p10, 100.0);
        assert_approx(bands[0].p90, 100.0);
        assert_approx(bands[1].p50, 105.5);
        assert_approx(bands[2].p10, 103.8);
        for band in bands {
            assert!(band.p10 <= band.p25);
            assert!(band.p25 <= band.p50);
            assert!(band.p50 <= band.p75);
            assert!(band.p75 <= band.p90);
        }
    }

    #[test]
    fn median_run_takes_each_step_independently() {
        let runs = vec![
            equity_run(&[100.0, 50.0, 300.0], &[10.0, 20.0], None),
            equity_run(&[100.0, 200.0, 10.0], &[30.0, 40.0], None),
            equity_run(&[100.0, 120.0, 150.0], &[20.0, 5.0], None),
        ];
        let median = median_run(&runs);
        assert_eq!(median.totals, vec![100.0, 120.0, 150.0]);
        assert_eq!(median.withdrawals, vec![20.0, 20.0]);
        assert_approx(median.balances[1].equity_a, 120.0);
        assert_approx(median.balances[1].cash, 0.0);
    }

    #[test]
    fn drawdown_tracks_running_peak() {
        let dd = run_drawdown(&[100.0, 120.0, 60.0, 90.0, 150.0, 100.0]);
        assert_approx(dd.max_drawdown, 0.5);
        assert_approx(dd.low_point, 60.0);

        let depleted = run_drawdown(&[100.0, 40.0, 0.0, 0.0]);
        assert_approx(depleted.max_drawdown, 1.0);
        assert_approx(depleted.low_point, 0.0);

        let flat = run_drawdown(&[0.0, 0.0]);
        assert_approx(flat.max_drawdown, 0.0);
        assert_eq!(run_drawdown(&[]), RunDrawdown::default());
    }

    #[test]
    fn drawdown_stats_report_median_and_extremes() {
        let runs = vec![
            equity_run(&[100.0, 90.0, 100.0], &[0.0, 0.0], None),
            equity_run(&[100.0, 50.0, 60.0], &[0.0, 0.0], None),
            equity_run(&[100.0, 0.0, 0.0], &[100.0, 0.0], Some(1)),
        ];
        let stats = drawdown_stats(&runs);
        assert_approx(stats.median_max_drawdown, 0.5);
        assert_approx(stats.worst_max_drawdown, 1.0);
        assert_approx(stats.median_low_point, 50.0);
        assert_approx(stats.lowest_low_point, 0.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_drawdown_is_a_fraction(totals in proptest::collection::vec(0.0f64..1e7, 1..40)) {
            let dd = run_drawdown(&totals);
            prop_assert!((0.0..=1.0).contains(&dd.max_drawdown));
            prop_assert!(totals.contains(&dd.low_point));
        }

        #[test]
        fn prop_percentile_stays_within_range(
            values in proptest::collection::vec(-1e6f64..1e6, 1..50),
            p in 0.0f64..=100.0
        ) {
            let mut sorted = values.clone();
            let result = percentile(&mut sorted, p);
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(result >= min - 1e-9 && result <= max + 1e-9);
        }
    }
}
