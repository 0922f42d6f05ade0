//! Messaging service abstraction and providers.

mod in_memory;
mod rabbitmq;
mod traits;

pub use in_memory::InMemoryMessagingService;
pub use rabbitmq::RabbitMqMessagingService;
pub use traits::{dlq_name, dlx_name, MessagingService, RawDelivery, ReceiptHandle};
