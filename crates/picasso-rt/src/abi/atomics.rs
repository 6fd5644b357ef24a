//! Atomic primitives over raw memory: store/load/add/sub/and/or/xor/
//! exchange/CAS for bool, the sized integers, the three float widths,
//! and a raw pointer. Compiled code
//! passes the address of a plain value it already owns — there is no
//! "atomic handle" to create or destroy, unlike [`super::sync_prim`].
//!
//! Every function takes a `*mut T` to memory the caller guarantees is
//! suitably aligned and large enough for `T`; `AtomicU32::from_ptr` and
//! friends (stable since Rust 1.75) borrow that memory as the matching
//! atomic type for the duration of the call, matching how a compiler
//! emitting raw loads/stores against the same address from other threads
//! would expect it to behave.
//!
//! Floats have no atomic counterpart in `core::sync::atomic`: `f32`/`f64`
//! are driven through `AtomicU32`/`AtomicU64` over the IEEE-754 bit
//! pattern, with arithmetic ops (`add`/`sub`) implemented as a
//! compare-and-swap loop that decodes, computes, and re-encodes the bits.
//! `f16` has no stable Rust type at all; its atomics operate on the raw
//! 16-bit pattern only — `add`/`sub` there are bit-pattern wraparound
//! arithmetic, not IEEE half-precision arithmetic, since there is no
//! stable way to interpret the bits as a float to compute with (recorded
//! in DESIGN.md).
//!
//! Pointer `add`/`sub` (no direct `fetch_add` on `AtomicPtr` in stable
//! std) and bool `add`/`sub` (no arithmetic on a one-bit type) are both
//! resolved the same way: a CAS retry loop computes the new value from
//! the old one read under the loop, so they are still genuinely atomic
//! even though the underlying type has no native fetch-and-add.

use std::sync::atomic::{
    AtomicBool, AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicPtr, AtomicU16, AtomicU32, AtomicU64, AtomicU8,
    Ordering,
};

const ORD: Ordering = Ordering::SeqCst;

/// Generates the nine `store/load/add/sub/and/or/xor/exchange/cas`
/// entry points for one integer width, named explicitly (macro_rules
/// has no stable identifier-pasting, so each call site spells out its
/// own function names).
macro_rules! int_atomic_ops {
    (
        $ty:ty, $atomic:ty,
        $store:ident, $load:ident, $add:ident, $sub:ident,
        $and:ident, $or:ident, $xor:ident, $exchange:ident, $cas:ident
    ) => {
        #[no_mangle]
        pub unsafe extern "C" fn $store(ptr: *mut $ty, val: $ty) {
            <$atomic>::from_ptr(ptr).store(val, ORD);
        }
        #[no_mangle]
        pub unsafe extern "C" fn $load(ptr: *mut $ty) -> $ty {
            <$atomic>::from_ptr(ptr).load(ORD)
        }
        #[no_mangle]
        pub unsafe extern "C" fn $add(ptr: *mut $ty, val: $ty) -> $ty {
            <$atomic>::from_ptr(ptr).fetch_add(val, ORD)
        }
        #[no_mangle]
        pub unsafe extern "C" fn $sub(ptr: *mut $ty, val: $ty) -> $ty {
            <$atomic>::from_ptr(ptr).fetch_sub(val, ORD)
        }
        #[no_mangle]
        pub unsafe extern "C" fn $and(ptr: *mut $ty, val: $ty) -> $ty {
            <$atomic>::from_ptr(ptr).fetch_and(val, ORD)
        }
        #[no_mangle]
        pub unsafe extern "C" fn $or(ptr: *mut $ty, val: $ty) -> $ty {
            <$atomic>::from_ptr(ptr).fetch_or(val, ORD)
        }
        #[no_mangle]
        pub unsafe extern "C" fn $xor(ptr: *mut $ty, val: $ty) -> $ty {
            <$atomic>::from_ptr(ptr).fetch_xor(val, ORD)
        }
        #[no_mangle]
        pub unsafe extern "C" fn $exchange(ptr: *mut $ty, val: $ty) -> $ty {
            <$atomic>::from_ptr(ptr).swap(val, ORD)
        }
        #[no_mangle]
        pub unsafe extern "C" fn $cas(ptr: *mut $ty, expected: $ty, new: $ty) -> bool {
            <$atomic>::from_ptr(ptr).compare_exchange(expected, new, ORD, ORD).is_ok()
        }
    };
}

int_atomic_ops!(
    u8, AtomicU8, picasso_atomic_u8_store, picasso_atomic_u8_load, picasso_atomic_u8_add, picasso_atomic_u8_sub,
    picasso_atomic_u8_and, picasso_atomic_u8_or, picasso_atomic_u8_xor, picasso_atomic_u8_exchange,
    picasso_atomic_u8_cas
);
int_atomic_ops!(
    u16, AtomicU16, picasso_atomic_u16_store, picasso_atomic_u16_load, picasso_atomic_u16_add,
    picasso_atomic_u16_sub, picasso_atomic_u16_and, picasso_atomic_u16_or, picasso_atomic_u16_xor,
    picasso_atomic_u16_exchange, picasso_atomic_u16_cas
);
int_atomic_ops!(
    u32, AtomicU32, picasso_atomic_u32_store, picasso_atomic_u32_load, picasso_atomic_u32_add,
    picasso_atomic_u32_sub, picasso_atomic_u32_and, picasso_atomic_u32_or, picasso_atomic_u32_xor,
    picasso_atomic_u32_exchange, picasso_atomic_u32_cas
);
int_atomic_ops!(
    u64, AtomicU64, picasso_atomic_u64_store, picasso_atomic_u64_load, picasso_atomic_u64_add,
    picasso_atomic_u64_sub, picasso_atomic_u64_and, picasso_atomic_u64_or, picasso_atomic_u64_xor,
    picasso_atomic_u64_exchange, picasso_atomic_u64_cas
);
int_atomic_ops!(
    i8, AtomicI8, picasso_atomic_i8_store, picasso_atomic_i8_load, picasso_atomic_i8_add, picasso_atomic_i8_sub,
    picasso_atomic_i8_and, picasso_atomic_i8_or, picasso_atomic_i8_xor, picasso_atomic_i8_exchange,
    picasso_atomic_i8_cas
);
int_atomic_ops!(
    i16, AtomicI16, picasso_atomic_i16_store, picasso_atomic_i16_load, picasso_atomic_i16_add,
    picasso_atomic_i16_sub, picasso_atomic_i16_and, picasso_atomic_i16_or, picasso_atomic_i16_xor,
    picasso_atomic_i16_exchange, picasso_atomic_i16_cas
);
int_atomic_ops!(
    i32, AtomicI32, picasso_atomic_i32_store, picasso_atomic_i32_load, picasso_atomic_i32_add,
    picasso_atomic_i32_sub, picasso_atomic_i32_and, picasso_atomic_i32_or, picasso_atomic_i32_xor,
    picasso_atomic_i32_exchange, picasso_atomic_i32_cas
);
int_atomic_ops!(
    i64, AtomicI64, picasso_atomic_i64_store, picasso_atomic_i64_load, picasso_atomic_i64_add,
    picasso_atomic_i64_sub, picasso_atomic_i64_and, picasso_atomic_i64_or, picasso_atomic_i64_xor,
    picasso_atomic_i64_exchange, picasso_atomic_i64_cas
);

// --- bool -------------------------------------------------------------
//
// `AtomicBool` has store/load/fetch_and/fetch_or/fetch_xor/swap/CAS
// natively, but no arithmetic. `add`/`sub` over GF(2) are both just XOR
// with the operand (true flips, false is a no-op; addition and
// subtraction coincide mod 2).

#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_bool_store(ptr: *mut bool, val: bool) {
    AtomicBool::from_ptr(ptr).store(val, ORD);
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_bool_load(ptr: *mut bool) -> bool {
    AtomicBool::from_ptr(ptr).load(ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_bool_add(ptr: *mut bool, val: bool) -> bool {
    AtomicBool::from_ptr(ptr).fetch_xor(val, ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_bool_sub(ptr: *mut bool, val: bool) -> bool {
    AtomicBool::from_ptr(ptr).fetch_xor(val, ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_bool_and(ptr: *mut bool, val: bool) -> bool {
    AtomicBool::from_ptr(ptr).fetch_and(val, ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_bool_or(ptr: *mut bool, val: bool) -> bool {
    AtomicBool::from_ptr(ptr).fetch_or(val, ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_bool_xor(ptr: *mut bool, val: bool) -> bool {
    AtomicBool::from_ptr(ptr).fetch_xor(val, ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_bool_exchange(ptr: *mut bool, val: bool) -> bool {
    AtomicBool::from_ptr(ptr).swap(val, ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_bool_cas(ptr: *mut bool, expected: bool, new: bool) -> bool {
    AtomicBool::from_ptr(ptr).compare_exchange(expected, new, ORD, ORD).is_ok()
}

// --- raw pointer --------------------------------------------------------
//
// `AtomicPtr` gives store/load/swap/CAS directly. `add`/`sub` (byte
// offsets, for a bump-style bump-pointer use) and `and`/`or`/`xor`
// (tag-bit manipulation on the low pointer bits, a common trick for
// packing flags into an aligned pointer) all go through a CAS retry
// loop since `AtomicPtr` has no native fetch-and-op beyond swap.

unsafe fn ptr_cas_loop(ptr: *mut *mut u8, f: impl Fn(*mut u8) -> *mut u8) -> *mut u8 {
    let atomic = AtomicPtr::from_ptr(ptr);
    let mut old = atomic.load(ORD);
    loop {
        let new = f(old);
        match atomic.compare_exchange_weak(old, new, ORD, ORD) {
            Ok(prev) => return prev,
            Err(actual) => old = actual,
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_ptr_store(ptr: *mut *mut u8, val: *mut u8) {
    AtomicPtr::from_ptr(ptr).store(val, ORD);
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_ptr_load(ptr: *mut *mut u8) -> *mut u8 {
    AtomicPtr::from_ptr(ptr).load(ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_ptr_add(ptr: *mut *mut u8, val: isize) -> *mut u8 {
    ptr_cas_loop(ptr, |old| old.wrapping_offset(val))
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_ptr_sub(ptr: *mut *mut u8, val: isize) -> *mut u8 {
    ptr_cas_loop(ptr, |old| old.wrapping_offset(-val))
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_ptr_and(ptr: *mut *mut u8, mask: usize) -> *mut u8 {
    ptr_cas_loop(ptr, |old| ((old as usize) & mask) as *mut u8)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_ptr_or(ptr: *mut *mut u8, mask: usize) -> *mut u8 {
    ptr_cas_loop(ptr, |old| ((old as usize) | mask) as *mut u8)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_ptr_xor(ptr: *mut *mut u8, mask: usize) -> *mut u8 {
    ptr_cas_loop(ptr, |old| ((old as usize) ^ mask) as *mut u8)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_ptr_exchange(ptr: *mut *mut u8, val: *mut u8) -> *mut u8 {
    AtomicPtr::from_ptr(ptr).swap(val, ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_ptr_cas(ptr: *mut *mut u8, expected: *mut u8, new: *mut u8) -> bool {
    AtomicPtr::from_ptr(ptr).compare_exchange(expected, new, ORD, ORD).is_ok()
}

// --- floats (f32, f64, f16) ---------------------------------------------
//
// Driven through the matching-width unsigned integer atomic over the
// IEEE-754 bit pattern. `store`/`load`/`exchange`/`cas`/`and`/`or`/`xor`
// are direct bit-pattern operations; `add`/`sub` decode, compute in the
// real float domain, and re-encode inside a CAS retry loop.

macro_rules! float_atomic_ops {
    (
        $float:ty, $bits:ty, $atomic:ty,
        $store:ident, $load:ident, $add:ident, $sub:ident,
        $and:ident, $or:ident, $xor:ident, $exchange:ident, $cas:ident
    ) => {
        #[no_mangle]
        pub unsafe extern "C" fn $store(ptr: *mut $float, val: $float) {
            <$atomic>::from_ptr(ptr as *mut $bits).store(val.to_bits(), ORD);
        }
        #[no_mangle]
        pub unsafe extern "C" fn $load(ptr: *mut $float) -> $float {
            <$float>::from_bits(<$atomic>::from_ptr(ptr as *mut $bits).load(ORD))
        }
        #[no_mangle]
        pub unsafe extern "C" fn $add(ptr: *mut $float, val: $float) -> $float {
            let atomic = <$atomic>::from_ptr(ptr as *mut $bits);
            let mut old_bits = atomic.load(ORD);
            loop {
                let old = <$float>::from_bits(old_bits);
                let new_bits = (old + val).to_bits();
                match atomic.compare_exchange_weak(old_bits, new_bits, ORD, ORD) {
                    Ok(_) => return old,
                    Err(actual) => old_bits = actual,
                }
            }
        }
        #[no_mangle]
        pub unsafe extern "C" fn $sub(ptr: *mut $float, val: $float) -> $float {
            let atomic = <$atomic>::from_ptr(ptr as *mut $bits);
            let mut old_bits = atomic.load(ORD);
            loop {
                let old = <$float>::from_bits(old_bits);
                let new_bits = (old - val).to_bits();
                match atomic.compare_exchange_weak(old_bits, new_bits, ORD, ORD) {
                    Ok(_) => return old,
                    Err(actual) => old_bits = actual,
                }
            }
        }
        #[no_mangle]
        pub unsafe extern "C" fn $and(ptr: *mut $float, val: $float) -> $float {
            <$float>::from_bits(<$atomic>::from_ptr(ptr as *mut $bits).fetch_and(val.to_bits(), ORD))
        }
        #[no_mangle]
        pub unsafe extern "C" fn $or(ptr: *mut $float, val: $float) -> $float {
            <$float>::from_bits(<$atomic>::from_ptr(ptr as *mut $bits).fetch_or(val.to_bits(), ORD))
        }
        #[no_mangle]
        pub unsafe extern "C" fn $xor(ptr: *mut $float, val: $float) -> $float {
            <$float>::from_bits(<$atomic>::from_ptr(ptr as *mut $bits).fetch_xor(val.to_bits(), ORD))
        }
        #[no_mangle]
        pub unsafe extern "C" fn $exchange(ptr: *mut $float, val: $float) -> $float {
            <$float>::from_bits(<$atomic>::from_ptr(ptr as *mut $bits).swap(val.to_bits(), ORD))
        }
        #[no_mangle]
        pub unsafe extern "C" fn $cas(ptr: *mut $float, expected: $float, new: $float) -> bool {
            <$atomic>::from_ptr(ptr as *mut $bits)
                .compare_exchange(expected.to_bits(), new.to_bits(), ORD, ORD)
                .is_ok()
        }
    };
}

float_atomic_ops!(
    f32, u32, AtomicU32, picasso_atomic_f32_store, picasso_atomic_f32_load, picasso_atomic_f32_add,
    picasso_atomic_f32_sub, picasso_atomic_f32_and, picasso_atomic_f32_or, picasso_atomic_f32_xor,
    picasso_atomic_f32_exchange, picasso_atomic_f32_cas
);
float_atomic_ops!(
    f64, u64, AtomicU64, picasso_atomic_f64_store, picasso_atomic_f64_load, picasso_atomic_f64_add,
    picasso_atomic_f64_sub, picasso_atomic_f64_and, picasso_atomic_f64_or, picasso_atomic_f64_xor,
    picasso_atomic_f64_exchange, picasso_atomic_f64_cas
);

// `f16` has no stable Rust type (as of this crate's MSRV), so its
// atomics operate purely on the raw 16-bit pattern: `add`/`sub` are
// wraparound integer arithmetic on the bits, not IEEE half-precision
// arithmetic, per the module doc comment above.

#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_f16_store(ptr: *mut u16, val: u16) {
    AtomicU16::from_ptr(ptr).store(val, ORD);
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_f16_load(ptr: *mut u16) -> u16 {
    AtomicU16::from_ptr(ptr).load(ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_f16_add(ptr: *mut u16, val: u16) -> u16 {
    AtomicU16::from_ptr(ptr).fetch_add(val, ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_f16_sub(ptr: *mut u16, val: u16) -> u16 {
    AtomicU16::from_ptr(ptr).fetch_sub(val, ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_f16_and(ptr: *mut u16, val: u16) -> u16 {
    AtomicU16::from_ptr(ptr).fetch_and(val, ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_f16_or(ptr: *mut u16, val: u16) -> u16 {
    AtomicU16::from_ptr(ptr).fetch_or(val, ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_f16_xor(ptr: *mut u16, val: u16) -> u16 {
    AtomicU16::from_ptr(ptr).fetch_xor(val, ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_f16_exchange(ptr: *mut u16, val: u16) -> u16 {
    AtomicU16::from_ptr(ptr).swap(val, ORD)
}
#[no_mangle]
pub unsafe extern "C" fn picasso_atomic_f16_cas(ptr: *mut u16, expected: u16, new: u16) -> bool {
    AtomicU16::from_ptr(ptr).compare_exchange(expected, new, ORD, ORD).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_add_returns_previous_value_and_commits() {
        let mut v: u32 = 10;
        let prev = unsafe { picasso_atomic_u32_add(&mut v, 5) };
        assert_eq!(prev, 10);
        assert_eq!(v, 15);
    }

    #[test]
    fn test_u64_cas_succeeds_only_on_match() {
        let mut v: u64 = 7;
        assert!(!unsafe { picasso_atomic_u64_cas(&mut v, 6, 100) });
        assert_eq!(v, 7);
        assert!(unsafe { picasso_atomic_u64_cas(&mut v, 7, 100) });
        assert_eq!(v, 100);
    }

    #[test]
    fn test_bool_xor_flips_on_true() {
        let mut v: bool = false;
        let prev = unsafe { picasso_atomic_bool_add(&mut v, true) };
        assert!(!prev);
        assert!(v);
    }

    #[test]
    fn test_ptr_add_offsets_by_bytes() {
        let buf = [0u8; 16];
        let mut p: *mut u8 = buf.as_ptr() as *mut u8;
        let prev = unsafe { picasso_atomic_ptr_add(&mut p as *mut *mut u8, 4) };
        assert_eq!(prev, buf.as_ptr() as *mut u8);
        assert_eq!(p, unsafe { buf.as_ptr().add(4) } as *mut u8);
    }

    #[test]
    fn test_f64_add_commits_float_sum() {
        let mut v: f64 = 1.5;
        let prev = unsafe { picasso_atomic_f64_add(&mut v, 2.25) };
        assert_eq!(prev, 1.5);
        assert_eq!(v, 3.75);
    }

    #[test]
    fn test_f16_bits_add_is_wraparound_integer_arithmetic() {
        let mut v: u16 = u16::MAX;
        let prev = unsafe { picasso_atomic_f16_add(&mut v, 2) };
        assert_eq!(prev, u16::MAX);
        assert_eq!(v, 1);
    }

    #[test]
    fn test_concurrent_add_sub_returns_to_start() {
        use std::sync::atomic::AtomicU64 as StdAtomicU64;
        use std::sync::Arc;
        use std::thread;

        let counter = Arc::new(StdAtomicU64::new(1000));
        let mut handles = Vec::new();
        for i in 0..8 {
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                let ptr = counter.as_ptr();
                for _ in 0..1000 {
                    if i % 2 == 0 {
                        unsafe { picasso_atomic_u64_add(ptr, 3) };
                    } else {
                        unsafe { picasso_atomic_u64_sub(ptr, 3) };
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1000);
    }
}
