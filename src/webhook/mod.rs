pub mod payload;
pub mod router;
pub mod signature;

pub use router::{WebhookOutcome, WebhookRouter};
