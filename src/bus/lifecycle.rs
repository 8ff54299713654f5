//! Two-phase readiness state shared by device emulators.

use tracing::debug;

/// Readiness of a device for its device-defined poll commands.
///
/// A device starts `Uninitialized`, becomes `Active` when it sees its activate
/// command, and returns to `Uninitialized` on startup/clear. The captured
/// sequence tag belongs to this instance, so two boards of the same model on
/// different buses never share a counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed or reset; polls answer default state
    #[default]
    Uninitialized,
    /// Activated; polls answer live state
    Active {
        /// Tag echoed on the next poll reply
        sequence_tag: u8,
    },
}

impl Lifecycle {
    /// Enter the active state, capturing the tag of the activate command
    pub fn activate(&mut self, sequence_tag: u8) {
        debug!(sequence_tag, "device activated");
        *self = Self::Active { sequence_tag };
    }

    /// Return to the uninitialized state
    pub fn reset(&mut self) {
        if self.is_active() {
            debug!("device reset");
        }
        *self = Self::Uninitialized;
    }

    /// Check whether the device answers polls with live state
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Tag the next poll reply will carry
    #[must_use]
    pub const fn sequence_tag(&self) -> Option<u8> {
        match self {
            Self::Active { sequence_tag } => Some(*sequence_tag),
            Self::Uninitialized => None,
        }
    }

    /// Take the tag for a poll reply and advance it
    pub fn next_tag(&mut self) -> Option<u8> {
        match self {
            Self::Active { sequence_tag } => {
                let tag = *sequence_tag;
                *sequence_tag = tag.wrapping_add(1);
                Some(tag)
            }
            Self::Uninitialized => None,
        }
    }
}
