//! Caching and request scheduling for expensive decoded media in tick-driven applications.
//!
//! Decoded resources (images, audio buffers, anything produced by an expensive decode) arrive
//! asynchronously and must stay bounded in memory without a garbage collector to lean on. The
//! host runs a periodic update tick, and at every tick something has to decide which resources
//! are still needed, which can go, and which pending load runs next, while never evicting a
//! resource that is in active use. This crate provides that decision layer via three types and
//! two traits:
//!
//! [TtlCache] is a keyed cache with touch-based liveness. Each entry carries an optional
//! time-to-live on two axes, ticks and wall-clock seconds, and a periodic sweep evicts entries
//! whose window has elapsed. Entries are addressed by [EntryId] handles, and a sweep-evicted
//! entry can be resurrected by touching its handle.
//!
//! [BoundedPayloadCache] is a size-budgeted cache for payloads implementing [Payload]. It tracks
//! recency of touch, budgets by decoded area rather than bytes, and pins items against eviction
//! either by [ReservationId] or while they are still decoding.
//!
//! [RequestQueue] drives asynchronous loads implementing [Request] strictly one at a time,
//! advancing when the head signals readiness and supporting promotion of a specific request to
//! the front.
//!
//! Everything is single-threaded and poll-driven: the host calls `update` once per tick, no call
//! blocks, and readiness is polled from the capability traits rather than pushed through
//! callbacks. The caches never inspect payload content; payloads are shared as `Arc`s with
//! whatever renders or plays them.
mod bounded_cache;
mod request_queue;
mod traits;
mod ttl_cache;

pub use bounded_cache::*;
pub use request_queue::*;
pub use traits::*;
pub use ttl_cache::*;
