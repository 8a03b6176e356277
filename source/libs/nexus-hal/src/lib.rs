// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! CONTEXT: Register-access capability shared by MMIO drivers
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 5 unit tests
//!
//! PUBLIC API:
//!   - Bus: 32-bit register access plus barrier and block copies
//!   - MmioBus: volatile access to a mapped register window
//!   - host::RamBus: memory-backed bus for host tests (feature `std`)
//!
//! NOTE:
//!   - Addresses passed to a `Bus` are byte offsets into the device window.
//!   - Block copies move whole little-endian words; a trailing partial word is
//!     zero-padded on write and truncated on read.

use core::sync::atomic::{fence, Ordering};

/// Width of one bus access in bytes.
pub const WORD_LEN: usize = 4;

/// Basic bus access trait shared by user drivers.
pub trait Bus {
    fn read(&self, addr: usize) -> u32;
    fn write(&self, addr: usize, value: u32);

    /// Orders every access issued before the barrier ahead of every access after it.
    fn barrier(&self) {
        fence(Ordering::SeqCst);
    }

    /// Copies `bytes` into the window starting at `addr` (memcpy_toio).
    fn write_block(&self, addr: usize, bytes: &[u8]) {
        for (i, chunk) in bytes.chunks(WORD_LEN).enumerate() {
            let mut word = [0u8; WORD_LEN];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write(addr + i * WORD_LEN, u32::from_le_bytes(word));
        }
    }

    /// Fills `out` from the window starting at `addr` (memcpy_fromio).
    fn read_block(&self, addr: usize, out: &mut [u8]) {
        for (i, chunk) in out.chunks_mut(WORD_LEN).enumerate() {
            let word = self.read(addr + i * WORD_LEN).to_le_bytes();
            let len = chunk.len();
            chunk.copy_from_slice(&word[..len]);
        }
    }
}

impl<B: Bus + ?Sized> Bus for &B {
    fn read(&self, addr: usize) -> u32 {
        (**self).read(addr)
    }

    fn write(&self, addr: usize, value: u32) {
        (**self).write(addr, value)
    }

    fn barrier(&self) {
        (**self).barrier()
    }
}

/// Volatile access to a memory-mapped register window.
pub struct MmioBus {
    base: usize,
}

impl MmioBus {
    /// # Safety
    ///
    /// `base` must be the virtual address of a mapped device window that stays
    /// mapped for the lifetime of the returned bus, and every offset the driver
    /// uses must fall inside it.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub const fn base(&self) -> usize {
        self.base
    }
}

impl Bus for MmioBus {
    fn read(&self, addr: usize) -> u32 {
        // SAFETY: `new` requires the window to be mapped for every driver offset.
        unsafe { core::ptr::read_volatile((self.base + addr) as *const u32) }
    }

    fn write(&self, addr: usize, value: u32) {
        // SAFETY: see `read`.
        unsafe { core::ptr::write_volatile((self.base + addr) as *mut u32, value) }
    }
}

#[cfg(feature = "std")]
pub mod host {
    //! Host-side bus backed by ordinary memory.

    use std::collections::BTreeMap;

    use parking_lot::Mutex;

    use super::{Bus, WORD_LEN};

    /// Sparse word-addressed memory. Unwritten words read as zero.
    #[derive(Default)]
    pub struct RamBus {
        words: Mutex<BTreeMap<usize, u32>>,
    }

    impl RamBus {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of distinct words written so far.
        pub fn touched(&self) -> usize {
            self.words.lock().len()
        }
    }

    impl Bus for RamBus {
        fn read(&self, addr: usize) -> u32 {
            debug_assert_eq!(addr % WORD_LEN, 0, "unaligned bus read at {addr:#x}");
            self.words.lock().get(&addr).copied().unwrap_or(0)
        }

        fn write(&self, addr: usize, value: u32) {
            debug_assert_eq!(addr % WORD_LEN, 0, "unaligned bus write at {addr:#x}");
            self.words.lock().insert(addr, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Bus;
    use core::cell::RefCell;

    struct MockBus {
        regs: RefCell<[u32; 16]>,
    }

    impl MockBus {
        fn new() -> Self {
            Self { regs: RefCell::new([0; 16]) }
        }
    }

    impl Bus for MockBus {
        fn read(&self, addr: usize) -> u32 {
            self.regs.borrow()[addr / 4]
        }

        fn write(&self, addr: usize, value: u32) {
            self.regs.borrow_mut()[addr / 4] = value;
        }
    }

    #[test]
    fn block_write_is_little_endian_words() {
        let bus = MockBus::new();
        bus.write_block(0x8, &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(bus.read(0x8), 0x0403_0201);
        assert_eq!(bus.read(0xc), 0x0807_0605);
    }

    #[test]
    fn block_read_matches_block_write() {
        let bus = MockBus::new();
        let payload: [u8; 12] = core::array::from_fn(|i| i as u8 + 1);
        bus.write_block(0x10, &payload);
        let mut out = [0u8; 12];
        bus.read_block(0x10, &mut out);
        assert_eq!(out, payload);
    }

    #[test]
    fn partial_word_is_padded_and_truncated() {
        let bus = MockBus::new();
        bus.write_block(0, &[0xaa, 0xbb]);
        assert_eq!(bus.read(0), 0x0000_bbaa);
        let mut out = [0u8; 3];
        bus.read_block(0, &mut out);
        assert_eq!(out, [0xaa, 0xbb, 0x00]);
    }

    #[test]
    fn reference_forwards_to_inner_bus() {
        let bus = MockBus::new();
        let by_ref = &bus;
        by_ref.write(4, 7);
        assert_eq!(bus.read(4), 7);
    }

    #[test]
    fn mmio_bus_keeps_its_base() {
        // SAFETY: the bus is never accessed, only inspected.
        let bus = unsafe { super::MmioBus::new(0x9700_0000) };
        assert_eq!(bus.base(), 0x9700_0000);
    }
}
