//! Live queries over component types and tags.
//!
//! A [`Query`] owns a [`QueryFilter`] and three entity sets: `matches` (the
//! current result), and `added`/`deleted` (membership changes during the
//! current tick). The world keeps every query up to date incrementally: each
//! tick it hands every query the per-entity [`Change`]s recorded since the last
//! flush, and a query only re-evaluates its filter for an entity when one of
//! the changed tokens is in its subscription set.
//!
//! ## Matching order
//!
//! [`Query::check_entity`] evaluates `all`, `any`, `one`, `not`, then the
//! custom predicate, stopping at the first failing stage. `one` means *exactly*
//! one of the listed tokens; a second hit fails.
//!
//! ## Bare `not` filters
//!
//! A filter made only of `not` terms subscribes only to those tokens, so an
//! entity is evaluated against it incrementally only when one of them changes
//! on it. A newly registered entity that never had any of them is therefore
//! not picked up until [`World::refresh_query`](crate::world::World::refresh_query)
//! runs a full scan, which does match every registered entity lacking the
//! tokens, including entities with no components at all.

use std::collections::HashSet;
use std::fmt;

use crate::command::Change;
use crate::entity::{EntityId, EntitySet};
use crate::store::{EntityView, Store};
use crate::token::Token;
use crate::world::World;

/// Identifier of a query registered in a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(pub(crate) u32);

/// Custom match predicate, evaluated after every token-based stage passed.
pub type Predicate = Box<dyn Fn(&EntityView<'_>) -> bool>;

// ---------------------------------------------------------------------------
// QueryFilter
// ---------------------------------------------------------------------------

/// Boolean filter over tokens plus an optional custom predicate.
///
/// ```
/// use tessera_ecs::prelude::*;
///
/// let mut world = World::new();
/// let position = world.register_component::<(f32, f32)>("position");
/// let frozen = world.tag_id("frozen");
///
/// let filter = QueryFilter::new().all([position]).not([frozen]);
/// let query = world.create_query(filter);
/// assert!(world.query(query).matches().is_empty());
/// ```
#[derive(Default)]
pub struct QueryFilter {
    /// Every token must be present.
    pub all: Vec<Token>,
    /// At least one token must be present.
    pub any: Vec<Token>,
    /// Exactly one token must be present.
    pub one: Vec<Token>,
    /// No token may be present.
    pub not: Vec<Token>,
    /// Arbitrary predicate, evaluated last.
    pub custom: Option<Predicate>,
    /// Tokens whose change should re-run the custom predicate.
    pub custom_subscription: Vec<Token>,
}

impl QueryFilter {
    /// An empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add tokens that must all be present.
    pub fn all<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        self.all.extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Add tokens of which at least one must be present.
    pub fn any<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        self.any.extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Add tokens of which exactly one must be present.
    pub fn one<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        self.one.extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Add tokens that must all be absent.
    pub fn not<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        self.not.extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Set the custom predicate and the tokens that should trigger its
    /// re-evaluation.
    pub fn custom<F, I, T>(mut self, predicate: F, subscription: I) -> Self
    where
        F: Fn(&EntityView<'_>) -> bool + 'static,
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        self.custom = Some(Box::new(predicate));
        self.custom_subscription
            .extend(subscription.into_iter().map(Into::into));
        self
    }

    /// Every token referenced by any stage of the filter.
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.all
            .iter()
            .chain(&self.any)
            .chain(&self.one)
            .chain(&self.not)
            .chain(&self.custom_subscription)
            .copied()
    }

    /// Evaluate the token stages against a presence test.
    fn evaluate_tokens(&self, has: impl Fn(Token) -> bool) -> bool {
        if !self.all.iter().all(|&t| has(t)) {
            return false;
        }

        if !self.any.is_empty() && !self.any.iter().any(|&t| has(t)) {
            return false;
        }

        if !self.one.is_empty() {
            let mut found = false;
            for &token in &self.one {
                if has(token) {
                    if found {
                        return false;
                    }
                    found = true;
                }
            }
            if !found {
                return false;
            }
        }

        !self.not.iter().any(|&t| has(t))
    }

    /// Whether an entity presenting exactly `shape` is guaranteed to match.
    ///
    /// Filters with a custom predicate are never statically known to match.
    pub fn matches_shape(&self, shape: &HashSet<Token>) -> bool {
        self.custom.is_none() && self.evaluate_tokens(|t| shape.contains(&t))
    }
}

impl fmt::Debug for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFilter")
            .field("all", &self.all)
            .field("any", &self.any)
            .field("one", &self.one)
            .field("not", &self.not)
            .field("custom", &self.custom.is_some())
            .field("custom_subscription", &self.custom_subscription)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A live, incrementally maintained result set.
#[derive(Debug)]
pub struct Query {
    filter: QueryFilter,
    subscriptions: HashSet<Token>,
    matches: EntitySet,
    added: EntitySet,
    deleted: EntitySet,
}

impl Query {
    pub(crate) fn new(filter: QueryFilter) -> Self {
        Self {
            filter,
            subscriptions: HashSet::new(),
            matches: EntitySet::new(),
            added: EntitySet::new(),
            deleted: EntitySet::new(),
        }
    }

    /// The filter this query evaluates.
    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    pub(crate) fn filter_mut(&mut self) -> &mut QueryFilter {
        &mut self.filter
    }

    /// Entities currently matching.
    pub fn matches(&self) -> &EntitySet {
        &self.matches
    }

    /// Entities that started matching during the current tick.
    pub fn added(&self) -> &EntitySet {
        &self.added
    }

    /// Entities that stopped matching during the current tick.
    pub fn deleted(&self) -> &EntitySet {
        &self.deleted
    }

    /// Tokens whose change can flip this query's verdict.
    pub fn subscriptions(&self) -> &HashSet<Token> {
        &self.subscriptions
    }

    /// Whether the query subscribes to `token`.
    pub fn is_subscribed(&self, token: Token) -> bool {
        self.subscriptions.contains(&token)
    }

    /// Evaluate the filter against an entity's registered state.
    pub fn check_entity(&self, view: &EntityView<'_>) -> bool {
        if !view.is_registered() {
            return false;
        }
        if !self.filter.evaluate_tokens(|t| view.has_token(t)) {
            return false;
        }
        match &self.filter.custom {
            Some(predicate) => predicate(view),
            None => true,
        }
    }

    /// Whether pooled entities of `shape` can be inserted without evaluation:
    /// the shape must match and must touch the query's subscriptions, exactly
    /// as a regular registration of that shape would.
    pub(crate) fn statically_matches(&self, shape: &HashSet<Token>) -> bool {
        self.filter.matches_shape(shape) && shape.iter().any(|t| self.subscriptions.contains(t))
    }

    pub(crate) fn clear_transient(&mut self) {
        self.added.clear();
        self.deleted.clear();
    }

    /// Rebuild subscriptions and recompute `matches` from scratch.
    pub(crate) fn full_update(&mut self, store: &Store) {
        self.matches.clear();
        self.subscriptions.clear();
        self.subscriptions.extend(self.filter.tokens());

        for entity in store.active.iter() {
            let Some(view) = store.view(entity) else {
                continue;
            };
            if self.check_entity(&view) {
                self.matches.insert(entity);
                self.added.insert(entity);
            }
        }
    }

    /// Apply one entity's pending change.
    ///
    /// `precomputed` is set when the entity was checked out of a pool whose
    /// shape is statically known to match this query.
    pub(crate) fn update_entity(
        &mut self,
        entity: EntityId,
        change: &Change,
        store: &Store,
        precomputed: bool,
    ) {
        if change.removed && self.matches.remove(entity) {
            self.deleted.insert(entity);
        }

        let touched = change.tokens.iter().any(|t| self.subscriptions.contains(t));

        if change.checkout.is_some() {
            if precomputed && !touched {
                if self.matches.insert(entity) {
                    self.added.insert(entity);
                }
                return;
            }
            let shape_touched = store.record(entity).is_some_and(|record| {
                Store::tokens_of(record).any(|t| self.subscriptions.contains(&t))
            });
            if touched || shape_touched {
                self.recheck(entity, store);
            }
            return;
        }

        if touched {
            self.recheck(entity, store);
        }
    }

    fn recheck(&mut self, entity: EntityId, store: &Store) {
        let passes = store
            .view(entity)
            .is_some_and(|view| self.check_entity(&view));
        let present = self.matches.contains(entity);
        if passes && !present {
            self.matches.insert(entity);
            self.added.insert(entity);
        } else if !passes && present {
            self.matches.remove(entity);
            self.deleted.insert(entity);
        }
    }
}

// ---------------------------------------------------------------------------
// World query API
// ---------------------------------------------------------------------------

impl World {
    /// Register a query and run its initial full scan.
    pub fn create_query(&mut self, filter: QueryFilter) -> QueryId {
        let id = QueryId(self.queries.len() as u32);
        let mut query = Query::new(filter);
        query.full_update(&self.store);
        for pool in &mut self.pools {
            pool.query_created(id, query.statically_matches(pool.shape()));
        }
        self.queries.push(Some(query));
        id
    }

    /// A registered query.
    ///
    /// # Panics
    ///
    /// Panics if the query was never created or has been removed.
    pub fn query(&self, id: QueryId) -> &Query {
        self.queries
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("unknown query {id:?}"))
    }

    fn query_mut(&mut self, id: QueryId) -> &mut Query {
        self.queries
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("unknown query {id:?}"))
    }

    /// Edit a query's filter. Call [`refresh_query`](Self::refresh_query)
    /// afterwards to resynchronize its subscriptions and matches.
    pub fn query_filter_mut(&mut self, id: QueryId) -> &mut QueryFilter {
        self.query_mut(id).filter_mut()
    }

    /// Rescan a query from scratch.
    pub fn refresh_query(&mut self, id: QueryId) {
        let query = self
            .queries
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("unknown query {id:?}"));
        query.full_update(&self.store);
        for pool in &mut self.pools {
            pool.query_created(id, query.statically_matches(pool.shape()));
        }
    }

    /// Stop maintaining a query and hand back its final state.
    pub fn remove_query(&mut self, id: QueryId) -> Query {
        let query = self
            .queries
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .unwrap_or_else(|| panic!("unknown query {id:?}"));
        for pool in &mut self.pools {
            pool.query_removed(id);
        }
        query
    }

    /// Number of live queries.
    pub fn query_count(&self) -> usize {
        self.queries.iter().flatten().count()
    }

    /// Call `f` for every entity matching `id`, with full access to the world.
    ///
    /// The matches are snapshotted first; mutations requested from `f` go
    /// through the deferred API and show up after the next flush.
    pub fn for_each_match<F>(&mut self, id: QueryId, mut f: F)
    where
        F: FnMut(&mut World, EntityId),
    {
        let snapshot = self.query(id).matches().as_slice().to_vec();
        for entity in snapshot {
            f(self, entity);
        }
    }

    /// Hand every pending change to every query. Returns the number of
    /// entities flushed.
    pub(crate) fn flush(&mut self) -> usize {
        let changes = self.pending.take();
        for (entity, change) in &changes {
            for (index, slot) in self.queries.iter_mut().enumerate() {
                let Some(query) = slot else {
                    continue;
                };
                let precomputed = change.checkout.is_some_and(|pool| {
                    self.pools[pool.index()]
                        .matching_queries()
                        .contains(&QueryId(index as u32))
                });
                query.update_entity(*entity, change, &self.store, precomputed);
            }
        }
        changes.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
