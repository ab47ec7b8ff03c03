pub mod api;
pub mod confluence;
pub mod exchange;
pub mod metric;
