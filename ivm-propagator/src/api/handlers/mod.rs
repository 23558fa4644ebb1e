mod contracts;
mod entities;
mod outbox;
mod sinks;
mod webhooks;

pub use contracts::*;
pub use entities::*;
pub use outbox::*;
pub use sinks::*;
pub use webhooks::*;
