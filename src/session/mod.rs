pub mod ordering;
pub mod store;
pub mod types;

pub use ordering::{combine, order};
pub use store::LocalStore;
pub use types::*;
