//! Execution cost adjustment.
//!
//! Applied after the raw R-multiple is known. Stop and target prices are
//! never moved by costs. Without a configured model no adjustment is made.

use serde::{Deserialize, Serialize};

use crate::domain::error::OrbError;
use crate::domain::simulator::TradeOutcome;
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub tick_size: f64,
    /// Slippage per side, in ticks.
    pub slippage_ticks: f64,
    /// Round-trip commission per contract, in currency.
    pub commission_per_contract: f64,
    /// Currency value of one full price point.
    pub point_value: f64,
}

impl CostModel {
    /// Total round-trip friction expressed in price points.
    pub fn round_trip_points(&self) -> f64 {
        2.0 * self.slippage_ticks * self.tick_size + self.commission_per_contract / self.point_value
    }

    /// Read `[costs.<instrument>]`. Returns `Ok(None)` when the section is
    /// absent; a partially specified section is an error.
    pub fn from_config(
        config: &dyn ConfigPort,
        instrument: &str,
    ) -> Result<Option<Self>, OrbError> {
        let section = format!("costs.{instrument}");
        let keys = ["tick_size", "slippage_ticks", "commission_per_contract", "point_value"];
        if keys.iter().all(|k| config.get_string(&section, k).is_none()) {
            return Ok(None);
        }

        let mut values = [0.0_f64; 4];
        for (i, key) in keys.iter().enumerate() {
            let raw = config
                .get_string(&section, key)
                .ok_or_else(|| OrbError::ConfigMissing {
                    section: section.clone(),
                    key: key.to_string(),
                })?;
            let value: f64 = raw.trim().parse().map_err(|_| OrbError::ConfigInvalid {
                section: section.clone(),
                key: key.to_string(),
                reason: format!("`{raw}` is not a number"),
            })?;
            if value < 0.0 || !value.is_finite() {
                return Err(OrbError::ConfigInvalid {
                    section: section.clone(),
                    key: key.to_string(),
                    reason: "must be a non-negative number".into(),
                });
            }
            values[i] = value;
        }
        if values[3] == 0.0 {
            return Err(OrbError::ConfigInvalid {
                section,
                key: "point_value".into(),
                reason: "point_value must be positive".into(),
            });
        }

        Ok(Some(Self {
            tick_size: values[0],
            slippage_ticks: values[1],
            commission_per_contract: values[2],
            point_value: values[3],
        }))
    }
}

/// Cost-adjusted R for a resolved trade; `None` for NO_TRADE outcomes or
/// when no model is configured.
pub fn net_r(outcome: &TradeOutcome, model: Option<&CostModel>) -> Option<f64> {
    let model = model?;
    let r = outcome.r_multiple?;
    let risk = outcome.risk?;
    if !outcome.is_resolved_trade() || risk <= 0.0 {
        return None;
    }
    Some(r - model.round_trip_points() / risk)
}
