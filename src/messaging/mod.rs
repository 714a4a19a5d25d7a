mod consumer;
mod offsets;
mod redpanda;

pub use consumer::{Acknowledger, DeliveryHandler, Disposition, InboundMessage, OrderConsumer, RebalanceContext};
pub use offsets::OffsetTracker;
pub use redpanda::{MessagePublisher, RedpandaProducer};
