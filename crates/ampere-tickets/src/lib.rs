pub mod analytics;
pub mod repository;

pub use analytics::*;
pub use repository::*;
