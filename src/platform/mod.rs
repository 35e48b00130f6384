pub use calls::*;
pub use types::*;

mod calls;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod types;
