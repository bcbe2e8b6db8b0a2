//! Executable code pages: mmap a writable region, fill it with assembled
//! bytes, then flip it read-execute (W^X). The JIT recompiles into a fresh
//! page whenever the current one fills up, rather than growing in place,
//! since an in-use page's absolute addresses must never move underneath
//! already-compiled callers.

use std::ptr::NonNull;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("mmap failed")]
    MmapFailed,
    #[error("mprotect failed")]
    MprotectFailed,
}

/// One mmap'd page (or run of pages) holding compiled code. Starts
/// writable; [`ExecutablePage::finish`] makes it execute-only.
pub struct ExecutablePage {
    base: NonNull<u8>,
    len: usize,
    cap: usize,
    executable: bool,
}

unsafe impl Send for ExecutablePage {}
unsafe impl Sync for ExecutablePage {}

impl ExecutablePage {
    /// Allocate a fresh RW page of at least `min_size` bytes, rounded up to
    /// the system page size.
    pub fn new(min_size: usize) -> Result<Self, MemoryError> {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
        let cap = (min_size.max(1) + page_size - 1) / page_size * page_size;
        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                cap,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(MemoryError::MmapFailed);
            }
            Ok(ExecutablePage {
                base: NonNull::new_unchecked(ptr as *mut u8),
                len: 0,
                cap,
                executable: false,
            })
        }
    }

    pub fn remaining(&self) -> usize {
        self.cap - self.len
    }

    pub fn base_ptr(&self) -> *const u8 {
        self.base.as_ptr()
    }

    /// Offset the next write would land at.
    pub fn cursor(&self) -> usize {
        self.len
    }

    /// Append bytes, panicking if the page is already executable or out of
    /// room — both are caller bugs, since the engine sizes pages up front.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        assert!(!self.executable, "cannot write into a finalized executable page");
        assert!(bytes.len() <= self.remaining(), "code page overflow");
        let at = self.len;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.as_ptr().add(at), bytes.len());
        }
        self.len += bytes.len();
        at
    }

    /// Overwrite an already-written span in place, for backpatching jump
    /// targets and `movabs` immediates before the page is finalized.
    pub fn patch(&mut self, at: usize, bytes: &[u8]) {
        assert!(!self.executable, "cannot patch a finalized executable page");
        assert!(at + bytes.len() <= self.len);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.as_ptr().add(at), bytes.len());
        }
    }

    /// Flip the page from RW to RX. After this, `write`/`patch` panic.
    pub fn finish(&mut self) -> Result<(), MemoryError> {
        if self.executable {
            return Ok(());
        }
        let result = unsafe { libc::mprotect(self.base.as_ptr() as *mut libc::c_void, self.cap, libc::PROT_READ | libc::PROT_EXEC) };
        if result != 0 {
            return Err(MemoryError::MprotectFailed);
        }
        self.executable = true;
        Ok(())
    }

    /// A function pointer at `offset` into this page.
    ///
    /// # Safety
    /// `offset` must point to the start of a previously compiled function,
    /// and the page must already be finalized.
    pub unsafe fn fn_ptr_at(&self, offset: usize) -> *const u8 {
        self.base.as_ptr().add(offset)
    }
}

impl Drop for ExecutablePage {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.cap);
        }
    }
}

/// A single RW-mapped, never-executable region backing every global
/// (`static`/file-scope) variable the JIT resolves. Sized once up front
/// rather than grown, since its base address is baked into every compiled
/// function's prologue as an immediate and must never move.
pub struct GlobalArena {
    base: NonNull<u8>,
    len: usize,
}

unsafe impl Send for GlobalArena {}
unsafe impl Sync for GlobalArena {}

impl GlobalArena {
    /// Allocate a fresh zeroed RW region of exactly `size` bytes.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(MemoryError::MmapFailed);
            }
            Ok(GlobalArena { base: NonNull::new_unchecked(ptr as *mut u8), len: size })
        }
    }

    pub fn base_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for GlobalArena {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(test)]
mod global_arena_tests {
    use super::*;

    #[test]
    fn fresh_arena_is_zeroed_and_writable() {
        let mut arena = GlobalArena::new(4096).unwrap();
        unsafe {
            assert_eq!(*arena.base_ptr(), 0);
            *arena.base_ptr() = 0x42;
            assert_eq!(*arena.base_ptr(), 0x42);
        }
        assert_eq!(arena.len(), 4096);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_ret_instruction() {
        let mut page = ExecutablePage::new(64).unwrap();
        let at = page.write(&[0xC3]);
        page.finish().unwrap();
        let f: extern "C" fn() = unsafe { std::mem::transmute(page.fn_ptr_at(at)) };
        f();
    }
}
