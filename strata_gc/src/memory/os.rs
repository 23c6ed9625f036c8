//! Operating-system mappings for chunks.
//!
//! Chunks are mapped with `mmap` on unix and trimmed to `CHUNK_SIZE`
//! alignment. Executable chunks are remapped read-write-execute when the
//! platform allows it; hardened systems that refuse W+X keep the chunk
//! read-write and the caller drops the executable flag.

use super::CHUNK_SIZE;
use strata_core::Address;

/// A successful mapping.
pub(crate) struct Mapping {
    pub base: Address,
    pub executable: bool,
}

#[cfg(unix)]
pub(crate) fn map_chunk(size: usize, executable: bool) -> Option<Mapping> {
    use std::ptr;

    debug_assert_eq!(size % CHUNK_SIZE, 0);
    let reserve = size + CHUNK_SIZE;

    // Safety: anonymous private mapping with no address hint.
    let raw = unsafe {
        libc::mmap(
            ptr::null_mut(),
            reserve,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if raw == libc::MAP_FAILED {
        return None;
    }

    let start = raw as usize;
    let aligned = strata_core::align_up(start, CHUNK_SIZE);
    let lead = aligned - start;
    let trail = reserve - lead - size;

    // Safety: both ranges lie inside the mapping created above.
    unsafe {
        if lead > 0 {
            libc::munmap(raw, lead);
        }
        if trail > 0 {
            libc::munmap((aligned + size) as *mut libc::c_void, trail);
        }
    }

    let executable = executable
        // Safety: the range is exactly the retained mapping.
        && unsafe {
            libc::mprotect(
                aligned as *mut libc::c_void,
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            ) == 0
        };

    Some(Mapping {
        base: Address::new(aligned),
        executable,
    })
}

#[cfg(unix)]
pub(crate) fn unmap_chunk(base: Address, size: usize) {
    // Safety: callers pass a base and size previously returned by map_chunk.
    let result = unsafe { libc::munmap(base.as_mut_ptr::<libc::c_void>(), size) };
    if result != 0 {
        tracing::warn!(target: "strata_gc::memory", %base, size, "munmap failed");
    }
}

#[cfg(not(unix))]
pub(crate) fn map_chunk(size: usize, _executable: bool) -> Option<Mapping> {
    let layout = std::alloc::Layout::from_size_align(size, CHUNK_SIZE).ok()?;
    // Safety: layout has non-zero size.
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    if ptr.is_null() {
        return None;
    }
    Some(Mapping {
        base: Address::from_ptr(ptr),
        executable: false,
    })
}

#[cfg(not(unix))]
pub(crate) fn unmap_chunk(base: Address, size: usize) {
    if let Ok(layout) = std::alloc::Layout::from_size_align(size, CHUNK_SIZE) {
        // Safety: allocated by map_chunk with the same layout.
        unsafe { std::alloc::dealloc(base.as_mut_ptr::<u8>(), layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_is_chunk_aligned_and_zeroed() {
        let mapping = map_chunk(CHUNK_SIZE, false).unwrap();
        assert!(mapping.base.is_aligned(CHUNK_SIZE));
        let bytes =
            unsafe { std::slice::from_raw_parts(mapping.base.as_ptr::<u8>(), CHUNK_SIZE) };
        assert!(bytes.iter().all(|&b| b == 0));
        unmap_chunk(mapping.base, CHUNK_SIZE);
    }

    #[test]
    fn test_multi_chunk_mapping() {
        let size = 3 * CHUNK_SIZE;
        let mapping = map_chunk(size, false).unwrap();
        assert!(mapping.base.is_aligned(CHUNK_SIZE));
        unsafe {
            mapping
                .base
                .offset(size - 8)
                .as_mut_ptr::<u64>()
                .write(0xdead_beef);
        }
        unmap_chunk(mapping.base, size);
    }
}
