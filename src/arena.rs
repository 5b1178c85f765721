//! Integer-ID primitives for the SPIR-V entity pool.

/// Index of an entity in the module's ID pool.
///
/// SPIR-V result IDs are dense small integers, so the pool is a flat vector
/// and every cross-reference between entities is an `Id`. The zero ID is
/// reserved and never names a live entity.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Id(pub u32);

impl Id {
    /// The reserved null ID.
    pub const NONE: Id = Id(0);

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    pub const fn is_some(self) -> bool {
        self.0 != 0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A dense set of [`Id`]s, backed by a bit set.
#[derive(Clone, Debug, Default)]
pub struct IdSet {
    members: bit_set::BitSet,
}

impl IdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all members from `self`.
    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// Add `id` to the set.
    ///
    /// Return `true` if `id` was not already present in the set.
    pub fn insert(&mut self, id: Id) -> bool {
        self.members.insert(id.index())
    }

    /// Remove `id` from the set.
    pub fn remove(&mut self, id: Id) -> bool {
        self.members.remove(id.index())
    }

    pub fn contains(&self, id: Id) -> bool {
        self.members.contains(id.index())
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Add the members of `other` to the set.
    pub fn union_with(&mut self, other: &IdSet) {
        self.members.union_with(&other.members);
    }

    /// Return an iterator over the members, in increasing ID order.
    pub fn iter(&self) -> impl '_ + Iterator<Item = Id> {
        self.members.iter().map(|index| Id(index as u32))
    }
}

impl FromIterator<Id> for IdSet {
    fn from_iter<T: IntoIterator<Item = Id>>(iter: T) -> Self {
        let mut set = IdSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}
