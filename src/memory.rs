//! Optional accounting of the large buffers a transcode allocates.

use alloc::vec::Vec;
use core::cell::Cell;
use core::ops::{Deref, DerefMut};

use crate::common::Raster;
use crate::error::{Error, Result};

/// Tracks buffer allocations made during one or more transcode calls.
///
/// Pass it by reference to the `*_tracked` entry points. Every charge is
/// released when the buffer it accounts for is dropped, on success and on
/// failure alike, so [`outstanding`](Self::outstanding) returns to zero once a
/// call has returned.
///
/// The tracker is deliberately not `Sync`: concurrent transcodes each use
/// their own.
#[derive(Debug, Default)]
pub struct AllocationTracker {
    limit: Option<usize>,
    outstanding: Cell<usize>,
    peak: Cell<usize>,
    allocations: Cell<u64>,
}

impl AllocationTracker {
    /// Creates a tracker without a limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracker that fails allocations once `bytes` would be exceeded.
    #[must_use]
    pub fn with_limit(bytes: usize) -> Self {
        Self {
            limit: Some(bytes),
            ..Self::default()
        }
    }

    /// Bytes currently held.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.get()
    }

    /// Highest value `outstanding` has reached.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.get()
    }

    /// Number of successful charges so far.
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.allocations.get()
    }

    pub(crate) fn charge(&self, bytes: usize) -> Result<Charge<'_>> {
        let total = self
            .outstanding
            .get()
            .checked_add(bytes)
            .ok_or_else(|| Error::out_of_memory("allocation size overflow"))?;
        if self.limit.is_some_and(|limit| total > limit) {
            return Err(Error::out_of_memory(alloc::format!(
                "allocating {bytes} bytes exceeds the memory limit"
            )));
        }
        self.outstanding.set(total);
        self.peak.set(self.peak.get().max(total));
        self.allocations.set(self.allocations.get() + 1);
        Ok(Charge {
            tracker: self,
            bytes,
        })
    }
}

/// A live charge against an [`AllocationTracker`]; released on drop.
#[derive(Debug)]
pub(crate) struct Charge<'t> {
    tracker: &'t AllocationTracker,
    bytes: usize,
}

impl Drop for Charge<'_> {
    fn drop(&mut self) {
        let outstanding = &self.tracker.outstanding;
        outstanding.set(outstanding.get() - self.bytes);
    }
}

/// Charges `bytes` to `tracker` if one is given.
pub(crate) fn charge(
    tracker: Option<&AllocationTracker>,
    bytes: usize,
) -> Result<Option<Charge<'_>>> {
    tracker.map(|t| t.charge(bytes)).transpose()
}

/// A value whose backing memory is charged to a tracker for as long as it lives.
#[derive(Debug)]
pub(crate) struct Tracked<'t, T> {
    value: T,
    _charge: Option<Charge<'t>>,
}

impl<'t> Tracked<'t, Raster> {
    /// Allocates a transparent raster, charging its pixel buffer first.
    pub(crate) fn raster(
        tracker: Option<&'t AllocationTracker>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let bytes = (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(4);
        let charge = charge(tracker, bytes)?;
        Ok(Self {
            value: Raster::new(width, height)?,
            _charge: charge,
        })
    }
}

impl<'t> Tracked<'t, Vec<u8>> {
    /// Allocates `len` zeroed bytes, charging them first.
    pub(crate) fn zeroed(
        tracker: Option<&'t AllocationTracker>,
        len: usize,
        what: &'static str,
    ) -> Result<Self> {
        let charge = charge(tracker, len)?;
        let mut value = Vec::new();
        value
            .try_reserve_exact(len)
            .map_err(|_| Error::out_of_memory(what))?;
        value.resize(len, 0);
        Ok(Self {
            value,
            _charge: charge,
        })
    }
}

impl<T> Deref for Tracked<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Tracked<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
