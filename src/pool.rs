use crossbeam_channel::{Receiver, Sender, bounded};

use crate::{Error, Result};

/// A fixed number of slots shared by concurrent embedding calls.
///
/// Each held permit is one token in a bounded channel sized to the slot count. Taking a permit
/// sends a token and blocks while the channel is full; dropping the permit takes a token back
/// out, including on early returns and panics.
pub struct EmbedPermits {
    capacity: usize,
    slots: Sender<()>,
    released: Receiver<()>,
}

/// RAII slot in an [`EmbedPermits`] pool.
pub struct Permit<'a> {
    pool: &'a EmbedPermits,
}

impl EmbedPermits {
    /// Create a pool with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (slots, released) = bounded(capacity);
        Self {
            capacity,
            slots,
            released,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits currently held.
    pub fn in_use(&self) -> usize {
        self.slots.len()
    }

    /// Block until a slot is free and take it.
    pub fn acquire(&self) -> Result<Permit<'_>> {
        self.slots
            .send(())
            .map_err(|_| Error::msg("embedding worker pool is closed"))?;
        Ok(Permit { pool: self })
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.pool.released.try_recv();
    }
}
