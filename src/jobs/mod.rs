pub mod metrics_sync;
