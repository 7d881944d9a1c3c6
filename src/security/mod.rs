//! Outbound destination policy.

pub mod destination;
pub mod resolver;

pub use destination::{
    blocked_range, BlockedRange, DestinationRejection, DestinationValidator,
    DEFAULT_INTERNAL_SUFFIXES,
};
pub use resolver::{GuardedDnsResolver, HostResolver, StaticResolver, SystemResolver};
