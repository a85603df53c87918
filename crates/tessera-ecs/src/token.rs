//! Query filter tokens: component types and interned string tags.
//!
//! Tags and component types are interchangeable in query filters, so both are
//! folded into a single [`Token`] type. Tags are interned once per world into
//! a [`TagId`] so that token hashing and comparison stay cheap on the flush
//! hot path.

use std::collections::HashMap;
use std::fmt;

use crate::component::ComponentTypeId;

/// Interned identifier of a string tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(pub(crate) u32);

impl fmt::Debug for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagId({})", self.0)
    }
}

/// A filter token: something an entity either has or does not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {
    /// A registered component type.
    Component(ComponentTypeId),
    /// An interned tag.
    Tag(TagId),
}

impl From<ComponentTypeId> for Token {
    fn from(id: ComponentTypeId) -> Self {
        Token::Component(id)
    }
}

impl From<TagId> for Token {
    fn from(id: TagId) -> Self {
        Token::Tag(id)
    }
}

/// Interns tag strings.
#[derive(Debug, Default)]
pub struct TagRegistry {
    by_name: HashMap<String, TagId>,
    names: Vec<String>,
}

impl TagRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning its id. Idempotent.
    pub fn intern(&mut self, name: &str) -> TagId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = TagId(self.names.len() as u32);
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), id);
        id
    }

    /// Look up an already-interned tag.
    pub fn lookup(&self, name: &str) -> Option<TagId> {
        self.by_name.get(name).copied()
    }

    /// The string behind a tag id.
    pub fn name(&self, id: TagId) -> &str {
        &self.names[id.0 as usize]
    }

    /// Number of interned tags.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no tag has been interned.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let mut tags = TagRegistry::new();
        let a = tags.intern("enemy");
        let b = tags.intern("enemy");
        let c = tags.intern("bullet");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.name(c), "bullet");
        assert_eq!(tags.lookup("bullet"), Some(c));
        assert_eq!(tags.lookup("missing"), None);
    }

    #[test]
    fn tokens_of_different_kinds_differ() {
        let component = Token::from(ComponentTypeId(0));
        let tag = Token::from(TagId(0));
        assert_ne!(component, tag);
    }
}
