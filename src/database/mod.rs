pub use postgres::pg_connect;
pub use queries::*;
pub use structs::*;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod postgres;
mod queries;
mod structs;
