pub mod error;
pub mod memory;
pub mod traits;

pub use error::StorageError;
pub use traits::*;
