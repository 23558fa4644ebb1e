pub mod handlers;
pub mod middleware;

pub use middleware::*;
