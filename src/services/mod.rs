pub mod amount;
pub mod payments;
pub mod plan;
pub mod store;
pub mod webhook;

pub use payments::{PaymentService, SubmitPayment};
pub use plan::resolve_plan;
pub use store::{MemoryPaymentStore, PaymentStore, RedisPaymentStore};
pub use webhook::WebhookNotifier;
