//! Rule resolver contract and registry.
//!
//! # Invariants
//! - At most one resolver per `RuleTag`.
//! - The registry is populated at startup and read-only afterwards.

use crate::model::item::ItemId;
use crate::model::rule::{Rule, RuleTag};
use crate::occurrence::accumulator::{AlarmCandidates, OccurrenceAccumulator};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;

/// Item a rule belongs to.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub store: &'a Path,
    pub item: ItemId,
}

/// Expands one rule kind into occurrences and alarm candidates.
///
/// Resolvers only receive rules whose tag equals `tag()`.
pub trait RuleResolver: Send + Sync {
    fn tag(&self) -> RuleTag;

    /// Contributes to, or removes from, the window accumulator.
    fn resolve_occurrences(
        &self,
        ctx: RuleContext<'_>,
        rule: &Rule,
        acc: &mut OccurrenceAccumulator,
    );

    /// Offers the earliest alarm later than `candidates.after()`, or removes
    /// offers.
    fn resolve_alarm_candidates(
        &self,
        ctx: RuleContext<'_>,
        rule: &Rule,
        candidates: &mut AlarmCandidates,
    );
}

/// Resolvers keyed by the rule tag they handle.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: BTreeMap<RuleTag, Arc<dyn RuleResolver>>,
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.resolvers.keys()).finish()
    }
}

impl ResolverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in rule kinds.
    pub fn with_basic_rules() -> Self {
        let mut registry = Self::new();
        crate::occurrence::basic_rules::register_basic_rules(&mut registry);
        registry
    }

    pub fn register(
        &mut self,
        resolver: Arc<dyn RuleResolver>,
    ) -> Result<(), ResolverRegistryError> {
        let tag = resolver.tag();
        if self.resolvers.contains_key(&tag) {
            return Err(ResolverRegistryError::DuplicateTag(tag));
        }
        self.resolvers.insert(tag, resolver);
        Ok(())
    }

    pub fn get(&self, tag: RuleTag) -> Option<&Arc<dyn RuleResolver>> {
        self.resolvers.get(&tag)
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverRegistryError {
    DuplicateTag(RuleTag),
}

impl Display for ResolverRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateTag(tag) => write!(f, "resolver already registered for rule `{tag}`"),
        }
    }
}

impl Error for ResolverRegistryError {}
