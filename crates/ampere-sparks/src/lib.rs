pub mod scope;
pub mod spark;
pub mod stack;

pub use scope::*;
pub use spark::*;
pub use stack::*;
