pub mod metrics;

pub mod prelude {
    pub use super::metrics::Entity as Metrics;
}
