pub mod driver;
pub mod error;
pub mod graph;
pub mod parser;
pub mod recorder;
pub mod report;
pub mod runner;
pub mod utils;

// Re-export common items
pub use driver::list_devices;
pub use error::{Error, Result};
pub use graph::generate_execution_order;
pub use report::generate_report;
pub use runner::run_bundle;
