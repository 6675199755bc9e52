use std::{collections::HashSet, num::NonZeroU16};

/// Number of distinct identifiers (zero is never handed out).
const CAPACITY: usize = u16::MAX as usize;

/// Hands out request identifiers for a single transport.
///
/// Identifiers increase monotonically (wrapping past `u16::MAX` back to 1) and are never zero.
/// An identifier stays outstanding until [Identifiers::release] is called for it, so exhaustion
/// can only happen when 65535 commands are awaiting replies at once, which indicates leaked
/// identifiers rather than load.
#[derive(Clone, Debug, Default)]
pub struct Identifiers {
    /// The most recently issued identifier (0 before the first).
    last: u16,

    /// Identifiers issued and not yet released.
    outstanding: HashSet<u16>,
}

impl Identifiers {
    /// Acquire the next free identifier.
    ///
    /// Returns `None` if every identifier is outstanding.
    pub fn acquire(&mut self) -> Option<NonZeroU16> {
        if self.outstanding.len() >= CAPACITY {
            return None;
        }
        loop {
            self.last = self.last.wrapping_add(1);
            let Some(identifier) = NonZeroU16::new(self.last) else {
                continue;
            };
            if self.outstanding.insert(identifier.get()) {
                return Some(identifier);
            }
        }
    }

    /// Return an identifier once its reply has been processed.
    ///
    /// Returns `false` if the identifier was not outstanding.
    pub fn release(&mut self, identifier: NonZeroU16) -> bool {
        self.outstanding.remove(&identifier.get())
    }

    /// Number of identifiers currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}
