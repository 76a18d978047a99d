//! Dispatch flags carried with every activation request.
//!
//! Packed into a `u32` so the same value travels unchanged through
//! replication messages and snapshots.

use serde::{Deserialize, Serialize};

/// Bit set of options controlling a single dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchFlags(u32);

impl DispatchFlags {
    /// No flags: announce, validate and count.
    pub const NONE: Self = Self(0);
    /// Skip eligibility re-validation; the caller already checked.
    pub const TRUST_CALLER: Self = Self(1);
    /// Do not increment the activation counters.
    pub const DONT_COUNT: Self = Self(1 << 1);
    /// Do not emit the user-visible activation notice.
    pub const DONT_SEND_NOTICE: Self = Self(1 << 2);

    const ALL_BITS: u32 = 0b111;

    /// Build from raw bits, dropping unknown bits.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL_BITS)
    }

    /// Raw bit value.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of both flag sets.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// `self` with the bits of `other` cleared.
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Whether no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for DispatchFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign for DispatchFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// Arguments for one dispatch: flags plus an optional forced seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchArgs {
    /// Dispatch options.
    pub flags: DispatchFlags,
    /// When set, the instance RNG is seeded from this value instead of
    /// drawing from the global effect stream.
    pub override_seed: Option<u64>,
}

impl DispatchArgs {
    /// Arguments with the given flags and no seed override.
    pub const fn with_flags(flags: DispatchFlags) -> Self {
        Self {
            flags,
            override_seed: None,
        }
    }

    /// Set the override seed.
    #[must_use]
    pub const fn seeded(mut self, seed: u64) -> Self {
        self.override_seed = Some(seed);
        self
    }

    /// Whether the given flag set is fully present.
    pub const fn has(&self, flags: DispatchFlags) -> bool {
        self.flags.contains(flags)
    }
}
