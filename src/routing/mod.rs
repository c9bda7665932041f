//! Key routing: hashing, virtual nodes and node selection
//!
//! Requests flow key -> [`HashCodeProvider`] -> [`KeyHash`](crate::core::KeyHash)
//! -> [`NodeSelector`] -> [`VirtualNode`] -> worker index.

pub mod hash;
pub mod node;
pub mod selector;

pub use hash::{AHashCodeProvider, Blake3HashCodeProvider, HashCodeProvider};
pub use node::{distribute, Distribution, VirtualNode};
pub use selector::{HashRing, Modulo, NodeSelector, RoundRobinMultiProducer, RoundRobinSingleProducer};
