//! Shared-memory worker liveness cells.
//!
//! The supervisor maps one 4-byte cell per worker slot in anonymous shared
//! memory before forking. Each child writes its own cell (the monotonic
//! second of the last request start) and the supervisor reads all of them;
//! word-sized atomic stores carry the values across the fork boundary
//! without locks.

use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
use nix::time::{clock_gettime, ClockId};

use crate::error::{Error, Result};

/// Monotonic clock reading in whole seconds.
pub fn monotonic_secs() -> u32 {
    clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map(|ts| ts.tv_sec() as u32)
        .unwrap_or(0)
}

/// One liveness cell per worker slot.
pub struct HeartbeatBlock {
    base: NonNull<AtomicU32>,
    slots: usize,
}

// Cells are written by exactly one child each and read by the supervisor.
unsafe impl Send for HeartbeatBlock {}
unsafe impl Sync for HeartbeatBlock {}

impl HeartbeatBlock {
    /// Map `slots × 4` bytes of zeroed shared memory.
    pub fn new(slots: usize) -> Result<Self> {
        if slots == 0 {
            return Err(Error::InvalidArgument(
                "heartbeat block needs at least one slot".to_string(),
            ));
        }
        let length = NonZeroUsize::new(slots * std::mem::size_of::<AtomicU32>())
            .ok_or_else(|| Error::InvalidArgument("heartbeat block size overflow".to_string()))?;
        let base = unsafe {
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )
        }
        .map_err(|errno| Error::Io(errno.into()))?;
        Ok(Self {
            base: base.cast(),
            slots,
        })
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    fn cell(&self, slot: usize) -> &AtomicU32 {
        assert!(slot < self.slots, "heartbeat slot out of range");
        unsafe { &*self.base.as_ptr().add(slot) }
    }

    /// Supervisor-side read of a slot's last-beat second.
    pub fn read(&self, slot: usize) -> u32 {
        self.cell(slot).load(Ordering::Relaxed)
    }

    /// Seed a slot with the current instant, done at fork so a fresh child
    /// is not mistaken for a stalled one.
    pub fn seed(&self, slot: usize) {
        self.cell(slot).store(monotonic_secs(), Ordering::Relaxed);
    }

    /// Write handle for one slot, handed to the child that owns it. Valid
    /// while the owning block stays mapped (in a child: for the process
    /// lifetime).
    pub fn slot(&self, slot: usize) -> HeartbeatSlot {
        let cell = self.cell(slot);
        HeartbeatSlot {
            cell: NonNull::from(cell),
        }
    }
}

impl Drop for HeartbeatBlock {
    fn drop(&mut self) {
        let length = self.slots * std::mem::size_of::<AtomicU32>();
        unsafe {
            let _ = munmap(self.base.cast(), length);
        }
    }
}

/// Write handle to a single heartbeat cell.
pub struct HeartbeatSlot {
    cell: NonNull<AtomicU32>,
}

unsafe impl Send for HeartbeatSlot {}

impl HeartbeatSlot {
    /// Record "a request starts now". Never blocks.
    pub fn beat(&self) {
        unsafe { self.cell.as_ref() }.store(monotonic_secs(), Ordering::Relaxed);
    }

    pub fn read(&self) -> u32 {
        unsafe { self.cell.as_ref() }.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_slots_is_rejected() {
        assert!(HeartbeatBlock::new(0).is_err());
    }

    #[test]
    fn test_cells_start_zeroed_and_seed() {
        let block = HeartbeatBlock::new(3).unwrap();
        for slot in 0..3 {
            assert_eq!(block.read(slot), 0);
        }
        block.seed(1);
        assert!(block.read(1) > 0);
        assert_eq!(block.read(0), 0);
    }

    #[test]
    fn test_beats_are_non_decreasing() {
        let block = HeartbeatBlock::new(1).unwrap();
        let slot = block.slot(0);
        slot.beat();
        let first = slot.read();
        slot.beat();
        let second = slot.read();
        assert!(second >= first);
        assert_eq!(block.read(0), second);
    }
}
