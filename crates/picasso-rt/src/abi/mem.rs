//! Memory entry points: `alloc`, `alloc_array`, `len`, and the Array ABI
//! (`{data, shape, length, rank}`) compiled code shares with the
//! runtime.

use crate::alloc::Arena;
use crate::runtime;

/// The Array ABI layout every compiled-code array shares with the
/// runtime: contiguous payload, a shape vector, a flat element count,
/// and its rank. Element size is the caller's concern — the runtime
/// only ever moves bytes.
#[repr(C)]
pub struct ArrayAbi {
    pub data: *mut i8,
    pub shape: *mut i64,
    pub length: i64,
    pub rank: i64,
}

fn alloc_zeroed(arena: &Arena, size: usize) -> *mut u8 {
    let ptr = arena.allocate(size);
    if !ptr.is_null() {
        unsafe { std::ptr::write_bytes(ptr, 0, size) };
    }
    ptr
}

/// # Safety
/// `dims` must point to `rank` contiguous `i64` values.
unsafe fn alloc_array_in(arena: &Arena, elem_size: i64, rank: i64, dims: *const i64) -> *mut ArrayAbi {
    let dims_slice = std::slice::from_raw_parts(dims, rank as usize);
    let length: i64 = dims_slice.iter().product();
    let payload_size = (length as usize) * (elem_size as usize);

    let data = alloc_zeroed(arena, payload_size) as *mut i8;

    let shape_bytes = (rank as usize) * std::mem::size_of::<i64>();
    let shape = arena.allocate(shape_bytes) as *mut i64;
    if !shape.is_null() {
        std::ptr::copy_nonoverlapping(dims, shape, rank as usize);
    }

    let header = arena.allocate(std::mem::size_of::<ArrayAbi>()) as *mut ArrayAbi;
    if header.is_null() {
        return std::ptr::null_mut();
    }
    std::ptr::write(header, ArrayAbi { data, shape, length, rank });
    header
}

/// Allocate `size` zero-initialized bytes from the calling task's
/// worker arena (or the global arena outside of any task), returning a
/// null pointer for a zero-size request per the allocator contract.
#[no_mangle]
pub extern "C" fn picasso_alloc(size: usize) -> *mut u8 {
    alloc_zeroed(&runtime::current_worker_arena(), size)
}

/// Allocate a rank-`rank` array of `elem_size`-byte elements with the
/// given dimensions, zero-initialized, returning an owned [`ArrayAbi`].
///
/// # Safety
/// `dims` must point to `rank` contiguous `i64` values.
#[no_mangle]
pub unsafe extern "C" fn picasso_alloc_array(elem_size: i64, rank: i64, dims: *const i64) -> *mut ArrayAbi {
    alloc_array_in(&runtime::current_worker_arena(), elem_size, rank, dims)
}

/// Flat element count of a previously allocated array.
///
/// # Safety
/// `array` must be a live pointer returned by [`picasso_alloc_array`].
#[no_mangle]
pub unsafe extern "C" fn picasso_len(array: *const ArrayAbi) -> i64 {
    if array.is_null() {
        return 0;
    }
    (*array).length
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_zeroed_zeroes_the_payload() {
        let arena = Arena::create();
        let p = alloc_zeroed(&arena, 32);
        assert!(!p.is_null());
        let slice = unsafe { std::slice::from_raw_parts(p, 32) };
        assert!(slice.iter().all(|&b| b == 0));
        unsafe { arena.release(p) };
    }

    #[test]
    fn test_alloc_array_in_computes_length_from_dims() {
        let arena = Arena::create();
        let dims = [2i64, 3i64];
        let header = unsafe { alloc_array_in(&arena, 8, 2, dims.as_ptr()) };
        assert!(!header.is_null());
        let hdr = unsafe { &*header };
        assert_eq!(hdr.length, 6);
        assert_eq!(hdr.rank, 2);
        assert!(!hdr.data.is_null());
        assert!(!hdr.shape.is_null());
        let shape = unsafe { std::slice::from_raw_parts(hdr.shape, 2) };
        assert_eq!(shape, &dims);
    }
}
