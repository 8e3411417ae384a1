//! Link rule behaviour flags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult};

bitflags! {
    /// Behaviour flags attached to a [`LinkRule`](crate::LinkRule).
    ///
    /// Raw values are stable so bindings can pass plain integers.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(into = "u32", try_from = "u32")]
    pub struct LinkFlags: u32 {
        /// Reject the rule if the target already exists on disk.
        const FAIL_IF_EXISTS = 0x1;
        /// Watch the source for changes and regenerate child entries.
        const MONITOR_CHANGES = 0x2;
        /// Materialize the target directory if absent; new files under the
        /// target are created in the source.
        const CREATE_TARGET = 0x4;
        /// Directory rules only: generate a child entry for every descendant.
        const RECURSIVE = 0x8;
    }
}

impl LinkFlags {
    /// Parse a raw flag word, rejecting unknown bits.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownFlags`] if any bit outside the defined
    /// flags is set.
    pub fn from_raw(raw: u32) -> CoreResult<Self> {
        Self::from_bits(raw).ok_or(CoreError::UnknownFlags(raw & !Self::all().bits()))
    }
}

impl From<LinkFlags> for u32 {
    fn from(flags: LinkFlags) -> Self {
        flags.bits()
    }
}

impl TryFrom<u32> for LinkFlags {
    type Error = CoreError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::from_raw(raw)
    }
}
