use crate::error::MetricsError;
use crate::models::exchange::{ContractKind, Instrument};
use crate::services::metric_source::MetricSource;
use crate::services::rate_controller::RateController;

/// Picks the most liquid perpetual contracts for a cycle.
pub struct SymbolSelector {
    liquidity_floor_usd: f64,
    /// When non-empty, only these exchange-native symbols are considered
    allowlist: Vec<String>,
    /// Only contracts settled in this asset; keeps BTCUSDT and BTCUSDC from
    /// both landing on the "BTC" key
    quote_asset: String,
}

impl SymbolSelector {
    pub fn new(liquidity_floor_usd: f64, allowlist: Vec<String>, quote_asset: &str) -> Self {
        Self {
            liquidity_floor_usd,
            allowlist,
            quote_asset: quote_asset.to_uppercase(),
        }
    }

    /// Active perpetuals in the configured quote asset above the liquidity
    /// floor, by 24h quote volume descending, windowed by `offset`/`limit`.
    pub async fn select_top_symbols(
        &self,
        source: &dyn MetricSource,
        rate: &RateController,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, MetricsError> {
        let instruments = rate
            .execute(source.exchange(), "instruments", move || {
                source.fetch_active_instruments()
            })
            .await?;

        let total = instruments.len();
        let selected = self.rank(instruments, limit, offset);

        tracing::debug!(
            "Selected {} of {} {} instruments (floor {:.0} USD, offset {})",
            selected.len(),
            total,
            source.exchange(),
            self.liquidity_floor_usd,
            offset
        );

        Ok(selected)
    }

    pub fn rank(&self, instruments: Vec<Instrument>, limit: usize, offset: usize) -> Vec<String> {
        let mut eligible: Vec<Instrument> = instruments
            .into_iter()
            .filter(|i| i.contract == ContractKind::Perpetual && i.active)
            .filter(|i| i.quote_asset.eq_ignore_ascii_case(&self.quote_asset))
            .filter(|i| i.quote_volume_24h.is_finite() && i.quote_volume_24h > self.liquidity_floor_usd)
            .filter(|i| self.allowlist.is_empty() || self.allowlist.contains(&i.symbol))
            .collect();

        // sort_by is stable, equal volumes keep exchange order
        eligible.sort_by(|a, b| b.quote_volume_24h.total_cmp(&a.quote_volume_24h));

        eligible
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|i| i.symbol)
            .collect()
    }
}
