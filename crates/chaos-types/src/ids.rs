//! Type-safe numeric identifier wrappers.
//!
//! Effects are addressed by a dense catalog index and live instances by a
//! per-run dispatch sequence number. Both are plain integers on the wire;
//! the newtypes keep them from being mixed up at compile time.

use serde::{Deserialize, Serialize};

/// Generates a transparent newtype wrapper around an unsigned integer.
macro_rules! define_index {
    (
        $(#[$meta:meta])*
        $name:ident($inner:ty)
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            /// Return the inner integer value.
            pub const fn into_inner(self) -> $inner {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_index! {
    /// Dense position of an effect in the built catalog, in `[0, N)`.
    EffectIndex(u32)
}

define_index! {
    /// Sequence number of a dispatched effect instance.
    ///
    /// Strictly increasing within a run and never reused. The first
    /// dispatch of a run receives ID 1.
    DispatchId(u64)
}

impl EffectIndex {
    /// Convert to a `usize` suitable for indexing per-effect tables.
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }

    /// Build an index from a table position, if it fits.
    pub fn from_usize(position: usize) -> Option<Self> {
        u32::try_from(position).ok().map(Self)
    }
}

impl DispatchId {
    /// The ID that follows this one, or `None` on overflow.
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }
}
