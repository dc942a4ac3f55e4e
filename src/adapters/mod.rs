//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod file_config_adapter;
pub mod json_report_adapter;
pub mod memory_index;
pub mod memory_store;
pub mod model_file_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
pub mod timeout_index;
