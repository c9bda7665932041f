/// Core reusable data structures
pub mod ring;

// Export the main types
pub use ring::{BoundedChannel, ChannelConsumer};
