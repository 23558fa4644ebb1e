pub mod changeset;
pub mod contract;
pub mod entity;
pub mod hash;
pub mod outbox;
pub mod sink;
pub mod validation;
pub mod webhook;

pub use changeset::*;
pub use contract::*;
pub use entity::*;
pub use hash::*;
pub use outbox::*;
pub use sink::*;
pub use validation::*;
pub use webhook::*;
