pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::InMemoryTracker;
pub use postgres::PostgresTracker;
pub use traits::{NodeFilter, ResourceTracker};
