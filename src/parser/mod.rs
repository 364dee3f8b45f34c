pub mod types;
pub mod yaml;

pub use yaml::{load_bundle, SuiteBundle};
