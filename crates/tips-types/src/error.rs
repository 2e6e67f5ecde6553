//! Shared error kinds for boundary crossings described in spec.md §7.

use thiserror::Error;

use crate::tag::Tag;

/// A message attempted to cross a process or host boundary that its type
/// doesn't support (spec.md §7: "Unsupported-message-at-boundary").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BoundaryError {
    #[error("message with tag {0} is not trivially destructible; dropped at transport boundary")]
    NotWireSafe(Tag),
}
