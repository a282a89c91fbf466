mod catalog;

pub use catalog::{ModelCatalog, ModelSpec, DEFAULT_MODEL};
