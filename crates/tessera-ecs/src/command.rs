//! Deferred structural mutations and the pending-change log.
//!
//! Every structural mutation requested through the deferred half of the
//! [`World`](crate::world::World) API becomes a [`Command`] in a FIFO
//! [`CommandQueue`]. The world drains the queue at a fixed point at the start
//! of each tick, before queries are flushed, so mutations requested while a
//! system walks a query's matches never touch that set mid-iteration, and all
//! same-tick mutations commute.
//!
//! Applying a command (or calling the immediate form directly) records what
//! changed in [`PendingChanges`]: one [`Change`] per entity, listing the
//! tokens that changed or flagging the entity as removed. The flush hands
//! those changes to every query.

use std::collections::{HashMap, VecDeque};

use crate::component::ComponentTypeId;
use crate::entity::EntityId;
use crate::pool::PoolId;
use crate::token::{TagId, Token};

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A single deferred mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Add an entity to the active list.
    RegisterEntity(EntityId),
    /// Destroy an entity, or return it to its pool.
    DestroyEntity(EntityId),
    /// Make an already-stored component visible to queries.
    RegisterComponent {
        /// Owner.
        entity: EntityId,
        /// Component type.
        component: ComponentTypeId,
    },
    /// Remove a component.
    DestroyComponent {
        /// Owner.
        entity: EntityId,
        /// Component type.
        component: ComponentTypeId,
    },
    /// Apply a tag.
    AddTag {
        /// Target.
        entity: EntityId,
        /// Interned tag.
        tag: TagId,
    },
    /// Remove a tag.
    RemoveTag {
        /// Target.
        entity: EntityId,
        /// Interned tag.
        tag: TagId,
    },
    /// Activate an entity checked out of a pool.
    RegisterPooled {
        /// The pooled entity.
        entity: EntityId,
        /// Its pool.
        pool: PoolId,
    },
}

impl Command {
    /// The entity this command targets.
    pub fn target(&self) -> EntityId {
        match *self {
            Command::RegisterEntity(entity) | Command::DestroyEntity(entity) => entity,
            Command::RegisterComponent { entity, .. }
            | Command::DestroyComponent { entity, .. }
            | Command::AddTag { entity, .. }
            | Command::RemoveTag { entity, .. }
            | Command::RegisterPooled { entity, .. } => entity,
        }
    }
}

// ---------------------------------------------------------------------------
// CommandQueue
// ---------------------------------------------------------------------------

/// FIFO queue of deferred commands.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: VecDeque<Command>,
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command.
    pub fn push(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    /// Take the oldest command.
    pub fn pop(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    /// Drop every queued command targeting `entity`. Returns how many were
    /// dropped.
    pub fn discard_for(&mut self, entity: EntityId) -> usize {
        let before = self.commands.len();
        self.commands.retain(|command| command.target() != entity);
        before - self.commands.len()
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Outcome of draining a command queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Commands that changed world state.
    pub applied: usize,
    /// Commands that were no-ops or targeted stale entities.
    pub skipped: usize,
}

impl ApplyReport {
    pub(crate) fn merge(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        self.skipped += other.skipped;
    }
}

// ---------------------------------------------------------------------------
// Change / PendingChanges
// ---------------------------------------------------------------------------

/// What happened to one entity since the last flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Change {
    /// The entity left the active list (destroyed or returned to its pool).
    pub removed: bool,
    /// The entity was checked out of this pool.
    pub checkout: Option<PoolId>,
    /// Tokens added or removed, without duplicates.
    pub tokens: Vec<Token>,
}

/// Per-entity change log, drained once per tick.
#[derive(Debug, Default)]
pub struct PendingChanges {
    entries: Vec<(EntityId, Change)>,
    positions: HashMap<EntityId, usize>,
}

impl PendingChanges {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, entity: EntityId) -> &mut Change {
        let pos = *self.positions.entry(entity).or_insert_with(|| {
            self.entries.push((entity, Change::default()));
            self.entries.len() - 1
        });
        &mut self.entries[pos].1
    }

    /// Record that `token` changed on `entity`.
    pub fn record_token(&mut self, entity: EntityId, token: Token) {
        let change = self.entry(entity);
        if !change.tokens.contains(&token) {
            change.tokens.push(token);
        }
    }

    /// Record that `entity` left the active list. Earlier token changes and
    /// checkouts for it are discarded.
    pub fn record_removed(&mut self, entity: EntityId) {
        let change = self.entry(entity);
        change.removed = true;
        change.checkout = None;
        change.tokens.clear();
    }

    /// Record that `entity` was checked out of `pool`.
    pub fn record_checkout(&mut self, entity: EntityId, pool: PoolId) {
        self.entry(entity).checkout = Some(pool);
    }

    /// The pending change for `entity`, if any.
    pub fn get(&self, entity: EntityId) -> Option<&Change> {
        self.positions.get(&entity).map(|&pos| &self.entries[pos].1)
    }

    /// Number of entities with pending changes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain every change in recording order.
    pub fn take(&mut self) -> Vec<(EntityId, Change)> {
        self.positions.clear();
        std::mem::take(&mut self.entries)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn token(n: u32) -> Token {
        Token::Component(ComponentTypeId(n))
    }

    #[test]
    fn queue_is_fifo() {
        let mut queue = CommandQueue::new();
        let a = EntityId::new(0, 0);
        let b = EntityId::new(1, 0);
        queue.push(Command::RegisterEntity(a));
        queue.push(Command::DestroyEntity(b));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(Command::RegisterEntity(a)));
        assert_eq!(queue.pop().map(|c| c.target()), Some(b));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn discard_for_keeps_other_targets_in_order() {
        let mut queue = CommandQueue::new();
        let a = EntityId::new(0, 0);
        let b = EntityId::new(1, 0);
        queue.push(Command::DestroyEntity(a));
        queue.push(Command::RegisterEntity(b));
        queue.push(Command::AddTag { entity: a, tag: TagId(0) });
        queue.push(Command::DestroyEntity(b));

        assert_eq!(queue.discard_for(a), 2);
        assert_eq!(queue.pop(), Some(Command::RegisterEntity(b)));
        assert_eq!(queue.pop(), Some(Command::DestroyEntity(b)));
        assert!(queue.is_empty());
    }

    #[test]
    fn tokens_are_deduplicated_per_entity() {
        let mut pending = PendingChanges::new();
        let e = EntityId::new(3, 0);
        pending.record_token(e, token(1));
        pending.record_token(e, token(2));
        pending.record_token(e, token(1));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.get(e).unwrap().tokens, vec![token(1), token(2)]);
    }

    #[test]
    fn removal_discards_earlier_changes() {
        let mut pending = PendingChanges::new();
        let e = EntityId::new(0, 0);
        pending.record_checkout(e, PoolId(0));
        pending.record_token(e, token(1));
        pending.record_removed(e);
        let change = pending.get(e).unwrap();
        assert!(change.removed);
        assert!(change.checkout.is_none());
        assert!(change.tokens.is_empty());
    }

    #[test]
    fn checkout_after_removal_keeps_both() {
        let mut pending = PendingChanges::new();
        let e = EntityId::new(0, 0);
        pending.record_removed(e);
        pending.record_checkout(e, PoolId(2));
        let change = pending.get(e).unwrap();
        assert!(change.removed);
        assert_eq!(change.checkout, Some(PoolId(2)));
    }

    #[test]
    fn take_drains_in_recording_order() {
        let mut pending = PendingChanges::new();
        let first = EntityId::new(5, 0);
        let second = EntityId::new(1, 0);
        pending.record_token(first, token(0));
        pending.record_removed(second);
        pending.record_token(first, token(1));

        let drained = pending.take();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, first);
        assert_eq!(drained[1].0, second);
        assert!(pending.is_empty());
        assert!(pending.get(first).is_none());
    }
}
