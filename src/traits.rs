//! Capability traits required from collaborators.
//!
//! The caches treat payloads as opaque: they never look at decoded content, only poll these
//! capabilities to decide what must be held and what may be evicted. Implement [Payload] on
//! whatever your decoder produces (a bitmap, an audio buffer) and [Request] on whatever drives the
//! underlying fetch/decode.

/// A decodable resource as seen by the caches.
pub trait Payload {
    /// A placeholder registered ahead of a real load. Placeholders are weak: they are never held
    /// against eviction and readiness checks ignore them.
    fn is_request_only(&self) -> bool;

    /// Finished decoding.
    fn is_ready(&self) -> bool;

    /// Decoding failed. The caches only report this state; retrying is the collaborator's job.
    fn is_error(&self) -> bool;

    /// Decoded width in pixels (or an equivalent axis for non-image payloads).
    fn width(&self) -> u64;

    /// Decoded height in pixels.
    fn height(&self) -> u64;

    /// Budget footprint of the decoded payload, as an area. Deliberately an approximation: the
    /// cache doesn't know pixel formats, so it budgets by area rather than bytes.
    fn area(&self) -> u64 {
        self.width() * self.height()
    }
}

/// An asynchronous load driven by a [RequestQueue](crate::RequestQueue).
pub trait Request {
    /// Poll whether the request has completed.
    fn is_request_ready(&self) -> bool;

    /// Begin the request, or keep it going. The queue calls this on the head request every tick
    /// until it reports ready, so it must be cheap and tolerate repeat calls while in flight.
    fn start_request(&mut self);
}
