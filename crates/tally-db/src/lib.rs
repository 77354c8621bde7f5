pub mod completion_repo;
pub mod priority_repo;
pub mod schema;
pub mod store;
pub mod util;

pub use crate::store::DbStore;
