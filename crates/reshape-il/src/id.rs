use core::fmt;

/// A program-wide identifier.
///
/// Identifiers name types, constants, variables, functions, basic blocks and instruction results.
/// They are allocated from a single [`IdentifierMap`] per program and are never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub u32);

impl Id {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Monotonic identifier allocator.
///
/// The bound is one past the largest identifier handed out (or declared by the source container).
/// Zero is reserved as the null identifier, matching both supported container formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierMap {
    bound: u32,
}

impl Default for IdentifierMap {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self { bound: 1 }
    }

    /// Creates a map whose first allocation will be `bound`.
    pub fn with_bound(bound: u32) -> Self {
        Self {
            bound: bound.max(1),
        }
    }

    pub fn alloc(&mut self) -> Id {
        let id = Id(self.bound);
        self.bound += 1;
        id
    }

    /// Allocates `count` consecutive identifiers and returns the first.
    pub fn alloc_range(&mut self, count: u32) -> Id {
        let first = Id(self.bound);
        self.bound += count;
        first
    }

    pub fn bound(&self) -> u32 {
        self.bound
    }

    /// The largest identifier that may currently be referenced, plus one.
    ///
    /// Encoders write this as the container's identifier bound.
    pub fn max_id(&self) -> u32 {
        self.bound
    }

    pub fn contains(&self, id: Id) -> bool {
        id.0 != 0 && id.0 < self.bound
    }

    /// Raises the bound so that `id` is valid, used when a decoder declares identifiers out of order.
    pub fn reserve(&mut self, id: Id) {
        if id.0 >= self.bound {
            self.bound = id.0 + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_monotonic_and_skips_zero() {
        let mut ids = IdentifierMap::new();
        assert_eq!(ids.alloc(), Id(1));
        assert_eq!(ids.alloc(), Id(2));
        assert_eq!(ids.alloc_range(3), Id(3));
        assert_eq!(ids.bound(), 6);
        assert!(!ids.contains(Id(0)));
        assert!(ids.contains(Id(5)));
        assert!(!ids.contains(Id(6)));
    }

    #[test]
    fn declared_bound_is_respected() {
        let mut ids = IdentifierMap::with_bound(40);
        assert!(ids.contains(Id(39)));
        assert_eq!(ids.alloc(), Id(40));

        ids.reserve(Id(10));
        assert_eq!(ids.bound(), 41, "reserving a lower id must not shrink the bound");
    }
}
