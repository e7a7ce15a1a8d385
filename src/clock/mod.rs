//! Drift-correctable logical clock.
//!
//! Both the authority and every peer own a [`LogicalClock`]. The clock
//! counts integer milliseconds from an anchor on a monotonic wall clock
//! ([`TimeSource`]) and absorbs corrections pushed by the authority:
//!
//! ```text
//! time = (now - origin_wall_time) + base_time
//!
//! adjust(+d)  -> applied on the next read
//! adjust(-d)  -> bled in while real time advances, reads never go backwards
//! ```

pub mod logical;
pub mod source;

#[cfg(test)]
mod tests;

pub use logical::LogicalClock;
pub use source::{ManualTimeSource, SharedTimeSource, TimeSource, TokioTimeSource};
