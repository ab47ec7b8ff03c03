use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per (symbol, timeframe, timestamp bucket)
        manager
            .create_table(
                Table::create()
                    .table(Metrics::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Metrics::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Metrics::Symbol).string_len(32).not_null())
                    .col(ColumnDef::new(Metrics::Timeframe).string_len(8).not_null())
                    .col(
                        ColumnDef::new(Metrics::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Metrics::Price).double().not_null())
                    .col(ColumnDef::new(Metrics::OpenInterestUsd).double().not_null())
                    .col(ColumnDef::new(Metrics::Volume24hUsd).double().not_null())
                    .col(ColumnDef::new(Metrics::PriceChange24hPct).double().not_null())
                    .col(ColumnDef::new(Metrics::GlobalLongShortRatio).double().null())
                    .col(ColumnDef::new(Metrics::TopTraderLongShortRatio).double().null())
                    .col(ColumnDef::new(Metrics::LongAccountPct).double().null())
                    .col(ColumnDef::new(Metrics::ShortAccountPct).double().null())
                    .col(ColumnDef::new(Metrics::ImbalancePct).double().null())
                    .col(ColumnDef::new(Metrics::FundingRatePct).double().null())
                    .col(ColumnDef::new(Metrics::Rsi).double().not_null().default(50.0))
                    .col(ColumnDef::new(Metrics::CumulativeVolumeDelta).double().null())
                    .col(
                        ColumnDef::new(Metrics::WeightedOpenInterestUsd)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(Metrics::MarketCapUsd).double().not_null())
                    .col(
                        ColumnDef::new(Metrics::OpenInterestDeltaPct)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Metrics::LongShortDeltaPct)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Metrics::TopTraderLongShortDeltaPct)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Metrics::ZScoreLongShort)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(Metrics::Vpi).double().not_null().default(0.0))
                    .col(
                        ColumnDef::new(Metrics::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await?;

        // Upsert target
        manager
            .create_index(
                Index::create()
                    .name("idx_metrics_symbol_tf_ts_unique")
                    .table(Metrics::Table)
                    .col(Metrics::Symbol)
                    .col(Metrics::Timeframe)
                    .col(Metrics::Timestamp)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Prior-row and history lookups: (symbol, timeframe, timestamp DESC)
        manager
            .create_index(
                Index::create()
                    .name("idx_metrics_symbol_tf_time")
                    .table(Metrics::Table)
                    .col(Metrics::Symbol)
                    .col(Metrics::Timeframe)
                    .col((Metrics::Timestamp, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_metrics_tf_time")
                    .table(Metrics::Table)
                    .col(Metrics::Timeframe)
                    .col((Metrics::Timestamp, IndexOrder::Desc))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Metrics::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Metrics {
    Table,
    Id,
    Symbol,
    Timeframe,
    Timestamp,
    Price,
    OpenInterestUsd,
    #[iden = "volume_24h_usd"]
    Volume24hUsd,
    #[iden = "price_change_24h_pct"]
    PriceChange24hPct,
    GlobalLongShortRatio,
    TopTraderLongShortRatio,
    LongAccountPct,
    ShortAccountPct,
    ImbalancePct,
    FundingRatePct,
    Rsi,
    CumulativeVolumeDelta,
    WeightedOpenInterestUsd,
    MarketCapUsd,
    OpenInterestDeltaPct,
    LongShortDeltaPct,
    TopTraderLongShortDeltaPct,
    ZScoreLongShort,
    Vpi,
    CreatedAt,
}
