//! Time-series storage for enriched metric rows.
//!
//! Rows are keyed by (symbol, timeframe, timestamp bucket). `SeaOrmMetricStore`
//! is the production implementation; `InMemoryMetricStore` backs tests and
//! database-less runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, DatabaseBackend, DatabaseConnection, EntityTrait, FromQueryResult, QueryFilter,
    QueryOrder, QuerySelect, Statement,
};
use std::collections::{BTreeMap, HashMap};

use crate::entities::{metrics, prelude::*};
use crate::error::MetricsError;
use crate::models::api::MAX_HISTORY_LIMIT;
use crate::models::metric::{EnrichedMetricRow, MetricKey, MetricRow, Timeframe};

#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Insert or overwrite the row at its (symbol, timeframe, timestamp) slot
    async fn upsert(&self, row: &EnrichedMetricRow) -> Result<(), MetricsError>;

    async fn query_latest(&self, key: &MetricKey) -> Result<Option<EnrichedMetricRow>, MetricsError>;

    /// Up to `limit` most recent rows, oldest first
    async fn query_history(
        &self,
        key: &MetricKey,
        limit: u64,
    ) -> Result<Vec<EnrichedMetricRow>, MetricsError>;

    /// Up to `limit` most recent rows strictly older than `before`, oldest first
    async fn query_history_before(
        &self,
        key: &MetricKey,
        before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<EnrichedMetricRow>, MetricsError>;

    /// Latest row of every symbol for `timeframe`, by 24h volume descending,
    /// windowed by `limit`/`offset`. Also returns the total symbol count.
    async fn query_latest_page(
        &self,
        timeframe: Timeframe,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<EnrichedMetricRow>, u64), MetricsError>;
}

pub struct SeaOrmMetricStore {
    db: DatabaseConnection,
}

impl SeaOrmMetricStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn from_model(model: metrics::Model) -> Result<EnrichedMetricRow, MetricsError> {
    let timeframe: Timeframe = model
        .timeframe
        .parse()
        .map_err(MetricsError::PersistenceFailure)?;

    Ok(EnrichedMetricRow {
        row: MetricRow {
            symbol: model.symbol,
            timeframe,
            timestamp: model.timestamp.with_timezone(&Utc),
            price: model.price,
            open_interest_usd: model.open_interest_usd,
            volume_24h_usd: model.volume_24h_usd,
            price_change_24h_pct: model.price_change_24h_pct,
            global_long_short_ratio: model.global_long_short_ratio,
            top_trader_long_short_ratio: model.top_trader_long_short_ratio,
            long_account_pct: model.long_account_pct,
            short_account_pct: model.short_account_pct,
            imbalance_pct: model.imbalance_pct,
            funding_rate_pct: model.funding_rate_pct,
            rsi: model.rsi,
            cumulative_volume_delta: model.cumulative_volume_delta,
            weighted_open_interest_usd: model.weighted_open_interest_usd,
            market_cap_usd: model.market_cap_usd,
        },
        open_interest_delta_pct: model.open_interest_delta_pct,
        long_short_delta_pct: model.long_short_delta_pct,
        top_trader_long_short_delta_pct: model.top_trader_long_short_delta_pct,
        z_score_long_short: model.z_score_long_short,
        vpi: model.vpi,
    })
}

fn to_active_model(enriched: &EnrichedMetricRow) -> metrics::ActiveModel {
    let row = &enriched.row;
    metrics::ActiveModel {
        id: NotSet,
        symbol: Set(row.symbol.clone()),
        timeframe: Set(row.timeframe.as_str().to_string()),
        timestamp: Set(row.timestamp.into()),
        price: Set(row.price),
        open_interest_usd: Set(row.open_interest_usd),
        volume_24h_usd: Set(row.volume_24h_usd),
        price_change_24h_pct: Set(row.price_change_24h_pct),
        global_long_short_ratio: Set(row.global_long_short_ratio),
        top_trader_long_short_ratio: Set(row.top_trader_long_short_ratio),
        long_account_pct: Set(row.long_account_pct),
        short_account_pct: Set(row.short_account_pct),
        imbalance_pct: Set(row.imbalance_pct),
        funding_rate_pct: Set(row.funding_rate_pct),
        rsi: Set(row.rsi),
        cumulative_volume_delta: Set(row.cumulative_volume_delta),
        weighted_open_interest_usd: Set(row.weighted_open_interest_usd),
        market_cap_usd: Set(row.market_cap_usd),
        open_interest_delta_pct: Set(enriched.open_interest_delta_pct),
        long_short_delta_pct: Set(enriched.long_short_delta_pct),
        top_trader_long_short_delta_pct: Set(enriched.top_trader_long_short_delta_pct),
        z_score_long_short: Set(enriched.z_score_long_short),
        vpi: Set(enriched.vpi),
        created_at: Set(Some(Utc::now().into())),
    }
}

fn from_models(models: Vec<metrics::Model>) -> Result<Vec<EnrichedMetricRow>, MetricsError> {
    models.into_iter().map(from_model).collect()
}

#[async_trait]
impl MetricStore for SeaOrmMetricStore {
    async fn upsert(&self, row: &EnrichedMetricRow) -> Result<(), MetricsError> {
        Metrics::insert(to_active_model(row))
            .on_conflict(
                OnConflict::columns([
                    metrics::Column::Symbol,
                    metrics::Column::Timeframe,
                    metrics::Column::Timestamp,
                ])
                .update_columns([
                    metrics::Column::Price,
                    metrics::Column::OpenInterestUsd,
                    metrics::Column::Volume24hUsd,
                    metrics::Column::PriceChange24hPct,
                    metrics::Column::GlobalLongShortRatio,
                    metrics::Column::TopTraderLongShortRatio,
                    metrics::Column::LongAccountPct,
                    metrics::Column::ShortAccountPct,
                    metrics::Column::ImbalancePct,
                    metrics::Column::FundingRatePct,
                    metrics::Column::Rsi,
                    metrics::Column::CumulativeVolumeDelta,
                    metrics::Column::WeightedOpenInterestUsd,
                    metrics::Column::MarketCapUsd,
                    metrics::Column::OpenInterestDeltaPct,
                    metrics::Column::LongShortDeltaPct,
                    metrics::Column::TopTraderLongShortDeltaPct,
                    metrics::Column::ZScoreLongShort,
                    metrics::Column::Vpi,
                ])
                .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(())
    }

    async fn query_latest(&self, key: &MetricKey) -> Result<Option<EnrichedMetricRow>, MetricsError> {
        Metrics::find()
            .filter(metrics::Column::Symbol.eq(key.symbol.as_str()))
            .filter(metrics::Column::Timeframe.eq(key.timeframe.as_str()))
            .order_by_desc(metrics::Column::Timestamp)
            .one(&self.db)
            .await?
            .map(from_model)
            .transpose()
    }

    async fn query_history(
        &self,
        key: &MetricKey,
        limit: u64,
    ) -> Result<Vec<EnrichedMetricRow>, MetricsError> {
        let mut models = Metrics::find()
            .filter(metrics::Column::Symbol.eq(key.symbol.as_str()))
            .filter(metrics::Column::Timeframe.eq(key.timeframe.as_str()))
            .order_by_desc(metrics::Column::Timestamp)
            .limit(limit)
            .all(&self.db)
            .await?;

        models.reverse();
        from_models(models)
    }

    async fn query_history_before(
        &self,
        key: &MetricKey,
        before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<EnrichedMetricRow>, MetricsError> {
        let before: DateTimeWithTimeZone = before.into();
        let mut models = Metrics::find()
            .filter(metrics::Column::Symbol.eq(key.symbol.as_str()))
            .filter(metrics::Column::Timeframe.eq(key.timeframe.as_str()))
            .filter(metrics::Column::Timestamp.lt(before))
            .order_by_desc(metrics::Column::Timestamp)
            .limit(limit)
            .all(&self.db)
            .await?;

        models.reverse();
        from_models(models)
    }

    async fn query_latest_page(
        &self,
        timeframe: Timeframe,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<EnrichedMetricRow>, u64), MetricsError> {
        #[derive(Debug, FromQueryResult)]
        struct SymbolCount {
            count: i64,
        }

        let total = SymbolCount::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"SELECT COUNT(DISTINCT symbol) AS count FROM metrics WHERE timeframe = $1"#,
            vec![timeframe.as_str().into()],
        ))
        .one(&self.db)
        .await?
        .map(|c| c.count.max(0) as u64)
        .unwrap_or(0);

        // DISTINCT ON keeps the newest row per symbol, the outer query ranks them
        let models = metrics::Model::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"
            SELECT * FROM (
                SELECT DISTINCT ON (symbol) *
                FROM metrics
                WHERE timeframe = $1
                ORDER BY symbol, timestamp DESC
            ) latest
            ORDER BY volume_24h_usd DESC, symbol ASC
            LIMIT $2 OFFSET $3
            "#,
            vec![
                timeframe.as_str().into(),
                sql_bound(limit).into(),
                sql_bound(offset).into(),
            ],
        ))
        .all(&self.db)
        .await?;

        Ok((from_models(models)?, total))
    }
}

/// Postgres LIMIT/OFFSET are BIGINT; larger values saturate
fn sql_bound(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Rows kept per (symbol, timeframe) by default, enough for the longest
/// history page
pub const DEFAULT_RETENTION: usize = MAX_HISTORY_LIMIT as usize;

/// Process-local store with the same ordering semantics as the SQL store.
///
/// Each series keeps at most `retention` rows; older buckets are evicted on
/// insert.
pub struct InMemoryMetricStore {
    rows: RwLock<HashMap<MetricKey, BTreeMap<DateTime<Utc>, EnrichedMetricRow>>>,
    retention: usize,
}

impl Default for InMemoryMetricStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            retention: retention.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().values().map(|series| series.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn upsert(&self, row: &EnrichedMetricRow) -> Result<(), MetricsError> {
        let mut rows = self.rows.write();
        let series = rows.entry(row.key()).or_default();
        series.insert(row.row.timestamp, row.clone());
        while series.len() > self.retention {
            series.pop_first();
        }
        Ok(())
    }

    async fn query_latest(&self, key: &MetricKey) -> Result<Option<EnrichedMetricRow>, MetricsError> {
        Ok(self
            .rows
            .read()
            .get(key)
            .and_then(|series| series.values().next_back().cloned()))
    }

    async fn query_history(
        &self,
        key: &MetricKey,
        limit: u64,
    ) -> Result<Vec<EnrichedMetricRow>, MetricsError> {
        let rows = self.rows.read();
        let Some(series) = rows.get(key) else {
            return Ok(Vec::new());
        };

        let mut history: Vec<EnrichedMetricRow> =
            series.values().rev().take(limit as usize).cloned().collect();
        history.reverse();
        Ok(history)
    }

    async fn query_history_before(
        &self,
        key: &MetricKey,
        before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<EnrichedMetricRow>, MetricsError> {
        let rows = self.rows.read();
        let Some(series) = rows.get(key) else {
            return Ok(Vec::new());
        };

        let mut history: Vec<EnrichedMetricRow> = series
            .range(..before)
            .rev()
            .take(limit as usize)
            .map(|(_, row)| row.clone())
            .collect();
        history.reverse();
        Ok(history)
    }

    async fn query_latest_page(
        &self,
        timeframe: Timeframe,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<EnrichedMetricRow>, u64), MetricsError> {
        let rows = self.rows.read();
        let mut latest: Vec<EnrichedMetricRow> = rows
            .iter()
            .filter(|(key, _)| key.timeframe == timeframe)
            .filter_map(|(_, series)| series.values().next_back().cloned())
            .collect();

        latest.sort_by(|a, b| {
            b.row
                .volume_24h_usd
                .total_cmp(&a.row.volume_24h_usd)
                .then_with(|| a.row.symbol.cmp(&b.row.symbol))
        });

        let total = latest.len() as u64;
        let page = latest
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect();

        Ok((page, total))
    }
}
