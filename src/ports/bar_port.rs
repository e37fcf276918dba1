//! Bar store port.

use chrono::{DateTime, Utc};

use crate::domain::bar::Bar;
use crate::domain::error::OrbError;

pub trait BarPort {
    /// Bars of `instrument` with `start <= timestamp < end`, ascending.
    fn fetch_bars(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, OrbError>;
}
