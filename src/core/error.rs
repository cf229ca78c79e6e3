use super::types::AssetBucket;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    #[error("horizon must be at least one year")]
    InvalidHorizon,

    #[error("run count must be at least one")]
    InvalidRunCount,

    #[error("initial {bucket} balance must be a finite value >= 0")]
    NegativeBalance { bucket: AssetBucket },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("no year has return data for every asset in use")]
    NoCommonYears,

    #[error("{asset} return series is empty")]
    EmptySeries { asset: AssetBucket },

    #[error("{asset} has no return for {year}")]
    MissingReturn { asset: AssetBucket, year: i32 },

    #[error("start year {start_year} with a {horizon}-year horizon runs outside the available data")]
    StartYearOutOfRange { start_year: i32, horizon: u32 },

    #[error("return path covers {available} year(s) but the horizon is {horizon}")]
    ShortPath { available: usize, horizon: u32 },

    #[error("simulation cancelled")]
    Cancelled,
}
