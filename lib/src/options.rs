//! Shared option types for property mappings and lifecycle dispatch.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Controls when a relational property is loaded.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchType {
    /// Load together with the owning entity.
    #[default]
    Eager,
    /// Load on first access to the collection.
    Lazy,
}

impl FetchType {
    pub fn is_lazy(self) -> bool {
        matches!(self, FetchType::Lazy)
    }
}

impl From<bool> for FetchType {
    fn from(lazy: bool) -> Self {
        if lazy {
            FetchType::Lazy
        } else {
            FetchType::Eager
        }
    }
}

/// A single cascaded operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cascade {
    Persist,
    Merge,
    Remove,
    Refresh,
    All,
}

impl Cascade {
    fn bit(self) -> u8 {
        match self {
            Cascade::Persist => 0b0001,
            Cascade::Merge => 0b0010,
            Cascade::Remove => 0b0100,
            Cascade::Refresh => 0b1000,
            Cascade::All => 0b1111,
        }
    }
}

/// The set of operations a relational property cascades.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct CascadeSet(u8);

impl CascadeSet {
    pub const NONE: CascadeSet = CascadeSet(0);
    pub const ALL: CascadeSet = CascadeSet(0b1111);

    pub fn of(ops: &[Cascade]) -> Self {
        CascadeSet(ops.iter().fold(0, |acc, c| acc | c.bit()))
    }

    pub fn with(self, op: Cascade) -> Self {
        CascadeSet(self.0 | op.bit())
    }

    /// True if `op` is cascaded. `All` is only contained by a set that
    /// cascades every operation.
    pub fn contains(self, op: Cascade) -> bool {
        self.0 & op.bit() == op.bit()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for CascadeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Cascade::Persist, "persist"),
            (Cascade::Merge, "merge"),
            (Cascade::Remove, "remove"),
            (Cascade::Refresh, "refresh"),
        ]
        .iter()
        .filter(|(op, _)| self.contains(*op))
        .map(|(_, name)| *name)
        .collect();
        write!(f, "CascadeSet({})", names.join("|"))
    }
}

impl From<Cascade> for CascadeSet {
    fn from(op: Cascade) -> Self {
        CascadeSet(op.bit())
    }
}

/// Shape of the collection backing a many-valued property.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// Ordered, duplicates allowed.
    #[default]
    List,
    /// Insertion ordered, unique members.
    Set,
    /// Unique members kept in sorted order.
    SortedSet,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    Single,
    Many(CollectionKind),
}

impl Cardinality {
    pub fn is_many(self) -> bool {
        matches!(self, Cardinality::Many(_))
    }
}

/// The points at which registered callbacks run.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    PrePersist,
    PostPersist,
    PostLoad,
    PreUpdate,
    PostUpdate,
    PreRemove,
    PostRemove,
}
