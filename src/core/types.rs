//! Core type definitions shared by routing, workers and configuration

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash derived from a routing key by a [`HashCodeProvider`](crate::routing::HashCodeProvider)
pub type KeyHash = i64;

/// Caller-supplied value that decides which worker runs a task.
///
/// Only used to derive a [`KeyHash`]; never stored beyond the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingKey<'a> {
    /// UTF-8 text key
    Text(&'a str),
    /// 32-bit integer key
    Int(i32),
    /// 64-bit integer key
    Long(i64),
    /// Raw byte key
    Bytes(&'a [u8]),
}

impl<'a> From<&'a str> for RoutingKey<'a> {
    fn from(key: &'a str) -> Self {
        RoutingKey::Text(key)
    }
}

impl<'a> From<&'a String> for RoutingKey<'a> {
    fn from(key: &'a String) -> Self {
        RoutingKey::Text(key.as_str())
    }
}

impl From<i32> for RoutingKey<'_> {
    fn from(key: i32) -> Self {
        RoutingKey::Int(key)
    }
}

impl From<i64> for RoutingKey<'_> {
    fn from(key: i64) -> Self {
        RoutingKey::Long(key)
    }
}

impl<'a> From<&'a [u8]> for RoutingKey<'a> {
    fn from(key: &'a [u8]) -> Self {
        RoutingKey::Bytes(key)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for RoutingKey<'a> {
    fn from(key: &'a [u8; N]) -> Self {
        RoutingKey::Bytes(key.as_slice())
    }
}

impl<'a> From<&'a Vec<u8>> for RoutingKey<'a> {
    fn from(key: &'a Vec<u8>) -> Self {
        RoutingKey::Bytes(key.as_slice())
    }
}

/// How a thread waits when it cannot make progress
/// (producer: channel full, consumer: channel empty)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    /// Busy spin with exponential backoff, lowest latency, burns a core
    Spinning,
    /// Spin briefly then yield the time slice
    Yielding,
    /// Park the thread until woken (consumer) or for a short timeout (producer)
    Parking,
}

impl std::str::FromStr for WaitPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "spinning" | "spin" => Ok(WaitPolicy::Spinning),
            "yielding" | "yield" => Ok(WaitPolicy::Yielding),
            "parking" | "park" => Ok(WaitPolicy::Parking),
            other => Err(format!("unknown wait policy '{}'", other)),
        }
    }
}

/// Node selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// Consistent hashing over randomly named virtual nodes
    HashRing,
    /// `|hash| % nodes`
    Modulo,
    /// Key-less round robin, single producer only
    RoundRobinSingleProducer,
    /// Key-less round robin, safe for concurrent producers
    RoundRobinMultiProducer,
}

impl SelectorKind {
    /// Whether the strategy looks at the key hash at all
    pub fn is_keyed(self) -> bool {
        matches!(self, SelectorKind::HashRing | SelectorKind::Modulo)
    }
}

impl std::str::FromStr for SelectorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hash_ring" | "hash-ring" | "ring" => Ok(SelectorKind::HashRing),
            "modulo" => Ok(SelectorKind::Modulo),
            "round_robin_single_producer" | "round_robin_sp" | "rr-sp" => {
                Ok(SelectorKind::RoundRobinSingleProducer)
            }
            "round_robin_multi_producer" | "round_robin_mp" | "rr-mp" | "round_robin" => {
                Ok(SelectorKind::RoundRobinMultiProducer)
            }
            other => Err(format!("unknown selector '{}'", other)),
        }
    }
}

/// What a worker does with queued, not yet started work on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Execute everything already enqueued, then exit
    Drain,
    /// Cancel everything already enqueued, then exit
    Discard,
}

impl std::str::FromStr for ShutdownPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "drain" => Ok(ShutdownPolicy::Drain),
            "discard" => Ok(ShutdownPolicy::Discard),
            other => Err(format!("unknown shutdown policy '{}'", other)),
        }
    }
}

/// Outcome of one dequeued envelope, reported to metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionStatus {
    /// Task body returned a value
    Success,
    /// Task body failed or panicked
    Error,
    /// Future was cancelled before execution
    Cancelled,
}

impl CompletionStatus {
    /// Label value used for metrics
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionStatus::Success => "SUCCESS",
            CompletionStatus::Error => "ERROR",
            CompletionStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_key_conversions() {
        let owned = String::from("user-1");
        assert_eq!(RoutingKey::from("user-1"), RoutingKey::Text("user-1"));
        assert_eq!(RoutingKey::from(&owned), RoutingKey::Text("user-1"));
        assert_eq!(RoutingKey::from(7i32), RoutingKey::Int(7));
        assert_eq!(RoutingKey::from(7i64), RoutingKey::Long(7));
        assert_eq!(RoutingKey::from(&[1u8, 2]), RoutingKey::Bytes(&[1, 2]));
        let v = vec![9u8];
        assert_eq!(RoutingKey::from(&v), RoutingKey::Bytes(&[9]));
    }

    #[test]
    fn selector_kind_parsing() {
        assert_eq!("modulo".parse::<SelectorKind>(), Ok(SelectorKind::Modulo));
        assert_eq!("rr-mp".parse::<SelectorKind>(), Ok(SelectorKind::RoundRobinMultiProducer));
        assert!("bogus".parse::<SelectorKind>().is_err());
        assert_eq!(
            "round_robin_single_producer".parse::<SelectorKind>(),
            Ok(SelectorKind::RoundRobinSingleProducer)
        );
        assert_eq!(
            "round_robin_multi_producer".parse::<SelectorKind>(),
            Ok(SelectorKind::RoundRobinMultiProducer)
        );
        assert_eq!("hash_ring".parse::<SelectorKind>(), Ok(SelectorKind::HashRing));
        assert!(SelectorKind::HashRing.is_keyed());
        assert!(!SelectorKind::RoundRobinSingleProducer.is_keyed());
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("parking".parse::<WaitPolicy>(), Ok(WaitPolicy::Parking));
        assert_eq!("spin".parse::<WaitPolicy>(), Ok(WaitPolicy::Spinning));
        assert_eq!("discard".parse::<ShutdownPolicy>(), Ok(ShutdownPolicy::Discard));
        assert!("sometimes".parse::<WaitPolicy>().is_err());
        assert!("later".parse::<ShutdownPolicy>().is_err());
    }

    #[test]
    fn serde_names_are_snake_case() {
        #[derive(Deserialize)]
        struct Probe {
            wait: WaitPolicy,
            selector: SelectorKind,
        }
        let probe: Probe = toml::from_str("wait = \"parking\"\nselector = \"round_robin_multi_producer\"").unwrap();
        assert_eq!(probe.wait, WaitPolicy::Parking);
        assert_eq!(probe.selector, SelectorKind::RoundRobinMultiProducer);
    }
}
