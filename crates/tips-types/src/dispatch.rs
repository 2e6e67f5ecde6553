//! Dispatcher core — a runtime mapping from `type_tag` to a handler
//! callback (SPEC_FULL.md §2 C4, §4.4).
//!
//! DESIGN NOTES calls for modeling the source's compile-time variadic
//! dispatch as "a sealed set of variant constructors plus a runtime
//! dispatch table keyed on `type_tag`". `Dispatcher` is that table: each
//! `Node` declares its receive interests by registering a handler per tag
//! (or one `JustBytes` fallback), and `dispatch` looks the tag up and
//! invokes it. Unknown tags are silently dropped, matching spec.md §4.4.

use std::collections::HashMap;

use crate::tag::Tag;

/// A `Node`'s view of one wrapped message as delivered off a ring: the tag
/// plus a raw byte view of `MessageHead || payload`.
pub struct DispatchMessage<'a> {
    pub tag: Tag,
    pub bytes: &'a [u8],
}

/// Compile-time-known-interest-tuple dispatch, modeled at runtime as a
/// `tag -> handler` table plus an optional `JustBytes` fallback.
pub struct Dispatcher<F> {
    handlers: HashMap<Tag, F>,
    just_bytes: Option<F>,
}

impl<F> Default for Dispatcher<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> Dispatcher<F> {
    pub fn new() -> Self {
        Self { handlers: HashMap::new(), just_bytes: None }
    }

    /// Registers `handler` for `tag`. Replaces any prior handler for the
    /// same tag (a Node declares its recv-interest tuple once at
    /// construction; re-registering is a configuration error by the
    /// caller, not something `Dispatcher` itself guards against).
    pub fn on(&mut self, tag: Tag, handler: F) {
        self.handlers.insert(tag, handler);
    }

    /// Registers the `JustBytes` wildcard interest (GLOSSARY): delivers the
    /// raw wrapped message for any tag not otherwise matched — used by the
    /// console/recording tools (spec.md §4.4).
    pub fn on_just_bytes(&mut self, handler: F) {
        self.just_bytes = Some(handler);
    }

    pub fn interests(&self) -> impl Iterator<Item = Tag> + '_ {
        self.handlers.keys().copied()
    }

    pub fn has_just_bytes(&self) -> bool {
        self.just_bytes.is_some()
    }
}

impl<F: FnMut(&DispatchMessage<'_>)> Dispatcher<F> {
    /// Looks up `msg.tag` and invokes the matching handler, falling back to
    /// `JustBytes` if registered; otherwise silently drops it.
    pub fn dispatch(&mut self, msg: &DispatchMessage<'_>) {
        if let Some(handler) = self.handlers.get_mut(&msg.tag) {
            handler(msg);
        } else if let Some(handler) = self.just_bytes.as_mut() {
            handler(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn dispatches_to_matching_tag_only() {
        let seen = RefCell::new(Vec::new());
        let mut d: Dispatcher<Box<dyn FnMut(&DispatchMessage<'_>)>> = Dispatcher::new();
        d.on(
            1001,
            Box::new(|m: &DispatchMessage<'_>| {
                seen.borrow_mut().push((m.tag, m.bytes.to_vec()));
            }),
        );

        d.dispatch(&DispatchMessage { tag: 1001, bytes: b"hi" });
        d.dispatch(&DispatchMessage { tag: 9999, bytes: b"ignored" });

        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].0, 1001);
    }

    #[test]
    fn just_bytes_catches_unmatched_tags() {
        let seen = RefCell::new(Vec::new());
        let mut d: Dispatcher<Box<dyn FnMut(&DispatchMessage<'_>)>> = Dispatcher::new();
        d.on_just_bytes(Box::new(|m: &DispatchMessage<'_>| {
            seen.borrow_mut().push(m.tag);
        }));
        d.dispatch(&DispatchMessage { tag: 42, bytes: b"x" });
        assert_eq!(*seen.borrow(), vec![42]);
    }
}
