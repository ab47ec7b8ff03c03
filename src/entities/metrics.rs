//! SeaORM Entity for the metrics time-series table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "metrics")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Exchange-neutral ticker (e.g. "BTC")
    pub symbol: String,
    /// "5m", "15m", "30m", "1h" or "1d"
    pub timeframe: String,
    /// Start of the timeframe bucket the snapshot belongs to
    pub timestamp: DateTimeWithTimeZone,
    pub price: f64,
    pub open_interest_usd: f64,
    #[sea_orm(column_name = "volume_24h_usd")]
    pub volume_24h_usd: f64,
    #[sea_orm(column_name = "price_change_24h_pct")]
    pub price_change_24h_pct: f64,
    pub global_long_short_ratio: Option<f64>,
    pub top_trader_long_short_ratio: Option<f64>,
    pub long_account_pct: Option<f64>,
    pub short_account_pct: Option<f64>,
    pub imbalance_pct: Option<f64>,
    pub funding_rate_pct: Option<f64>,
    pub rsi: f64,
    pub cumulative_volume_delta: Option<f64>,
    pub weighted_open_interest_usd: f64,
    pub market_cap_usd: f64,
    pub open_interest_delta_pct: f64,
    pub long_short_delta_pct: f64,
    pub top_trader_long_short_delta_pct: f64,
    pub z_score_long_short: f64,
    pub vpi: f64,
    pub created_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
