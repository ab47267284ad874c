// src/store/triggers.rs

//! Typed mutation trigger registry
//!
//! Observers subscribe with a class filter, a lifecycle phase and the set of
//! mutation kinds they care about. The store dispatches matching observers
//! in registration order. Saves issued with `SaveOptions::skip_triggers`
//! bypass dispatch entirely, which is how observers persist their own
//! records without re-entering themselves.

use super::Store;
use crate::db::models::Record;
use crate::error::Result;
use std::sync::Arc;

/// Kind of mutation applied to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

/// Which classes a subscription applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassFilter {
    Any,
    Class(String),
}

impl ClassFilter {
    pub fn class(name: impl Into<String>) -> Self {
        ClassFilter::Class(name.into())
    }

    fn accepts(&self, class: &str) -> bool {
        match self {
            ClassFilter::Any => true,
            ClassFilter::Class(name) => name == class,
        }
    }
}

/// Lifecycle phase relative to persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before the write; an error aborts the mutation
    Before,
    /// After the write is durable
    After,
}

/// Set of mutation kinds a subscription fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationKinds {
    pub create: bool,
    pub update: bool,
    pub delete: bool,
}

impl MutationKinds {
    pub const ALL: MutationKinds = MutationKinds {
        create: true,
        update: true,
        delete: true,
    };

    fn contains(&self, kind: MutationKind) -> bool {
        match kind {
            MutationKind::Create => self.create,
            MutationKind::Update => self.update,
            MutationKind::Delete => self.delete,
        }
    }
}

/// Receiver of mutation events
///
/// `record` is the mutated record; for updates and deletes its `previous`
/// field holds the plain object as it was before the mutation.
pub trait MutationObserver {
    fn on_mutation(&self, store: &Store, kind: MutationKind, record: &mut Record) -> Result<()>;
}

impl<F> MutationObserver for F
where
    F: Fn(&Store, MutationKind, &mut Record) -> Result<()>,
{
    fn on_mutation(&self, store: &Store, kind: MutationKind, record: &mut Record) -> Result<()> {
        self(store, kind, record)
    }
}

struct Subscription {
    filter: ClassFilter,
    phase: Phase,
    kinds: MutationKinds,
    observer: Arc<dyn MutationObserver>,
}

/// Ordered list of trigger subscriptions
#[derive(Default)]
pub struct TriggerRegistry {
    subscriptions: Vec<Subscription>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscription; dispatch order is registration order
    pub fn subscribe(
        &mut self,
        filter: ClassFilter,
        phase: Phase,
        kinds: MutationKinds,
        observer: Arc<dyn MutationObserver>,
    ) {
        self.subscriptions.push(Subscription {
            filter,
            phase,
            kinds,
            observer,
        });
    }

    /// Observers to notify for a mutation, in registration order
    pub fn matching(
        &self,
        class: &str,
        phase: Phase,
        kind: MutationKind,
    ) -> Vec<Arc<dyn MutationObserver>> {
        self.subscriptions
            .iter()
            .filter(|s| s.phase == phase && s.kinds.contains(kind) && s.filter.accepts(class))
            .map(|s| Arc::clone(&s.observer))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn MutationObserver> {
        Arc::new(|_: &Store, _: MutationKind, _: &mut Record| -> Result<()> { Ok(()) })
    }

    #[test]
    fn test_matching_filters_by_class_phase_and_kind() {
        let mut registry = TriggerRegistry::new();
        registry.subscribe(ClassFilter::Any, Phase::After, MutationKinds::ALL, noop());
        registry.subscribe(ClassFilter::class("Widget"), Phase::After, MutationKinds::ALL, noop());
        registry.subscribe(
            ClassFilter::class("Widget"),
            Phase::Before,
            MutationKinds {
                create: true,
                update: false,
                delete: false,
            },
            noop(),
        );

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.matching("Widget", Phase::After, MutationKind::Update).len(), 2);
        assert_eq!(registry.matching("Gadget", Phase::After, MutationKind::Update).len(), 1);
        assert_eq!(registry.matching("Widget", Phase::Before, MutationKind::Create).len(), 1);
        assert!(registry.matching("Widget", Phase::Before, MutationKind::Delete).is_empty());
    }

    #[test]
    fn test_mutation_kind_names() {
        assert_eq!(MutationKind::Create.as_str(), "create");
        assert_eq!(MutationKind::Update.as_str(), "update");
        assert_eq!(MutationKind::Delete.as_str(), "delete");
    }
}
