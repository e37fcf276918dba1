//! Persistence of daily feature rows.

use chrono::NaiveDate;

use crate::domain::error::OrbError;
use crate::domain::features::DailyFeatureRow;

pub trait FeaturePort {
    /// Store one complete row atomically, replacing any earlier build of the
    /// same day.
    fn save_feature_row(&self, row: &DailyFeatureRow) -> Result<(), OrbError>;

    fn has_feature_row(&self, instrument: &str, trading_day: NaiveDate) -> Result<bool, OrbError>;

    fn load_feature_row(
        &self,
        instrument: &str,
        trading_day: NaiveDate,
    ) -> Result<Option<DailyFeatureRow>, OrbError>;

    /// Persisted trading days in `[start, end]`, ascending.
    fn feature_days(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, OrbError>;
}
