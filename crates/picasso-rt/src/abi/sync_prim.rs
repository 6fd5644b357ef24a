//! Mutex/rwmutex ABI entry points, thin wrappers around
//! `sync::TaskRwMutex`. A plain mutex is a rwmutex used only in writer
//! mode, so `picasso_mutex_*` and `picasso_rwmutex_*` share one backing
//! type and differ only in which guard variant they hand back.
//!
//! Lock/unlock is a create-handle/destroy-handle pair rather than a
//! scope, since compiled code calls them as two separate instructions:
//! `picasso_*_lock` leaks a boxed guard and returns it opaquely;
//! `picasso_*_unlock` drops it.

use crate::sync::{ReadGuard, TaskRwMutex, TaskRwMutexKind, WriteGuard};

/// Allocate a new mutex (`is_rw == false`) or rwmutex (`is_rw == true`).
#[no_mangle]
pub extern "C" fn picasso_mutex_create(is_rw: bool) -> *mut TaskRwMutex {
    let kind = if is_rw { TaskRwMutexKind::RwMutex } else { TaskRwMutexKind::Mutex };
    Box::into_raw(Box::new(TaskRwMutex::new(kind)))
}

/// # Safety
/// `handle` must be a pointer returned by [`picasso_mutex_create`], not
/// currently locked, and not used again after this call.
#[no_mangle]
pub unsafe extern "C" fn picasso_mutex_destroy(handle: *mut TaskRwMutex) {
    drop(Box::from_raw(handle));
}

/// Acquire `handle` for writing (for a plain mutex, the only mode),
/// cooperatively yielding the current task while contended. Returns an
/// opaque guard handle to pass to [`picasso_mutex_unlock`].
///
/// # Safety
/// `handle` must be a live handle from [`picasso_mutex_create`] that
/// outlives the returned guard.
#[no_mangle]
pub unsafe extern "C" fn picasso_mutex_lock(handle: *mut TaskRwMutex) -> *mut WriteGuard<'static> {
    let mtx: &'static TaskRwMutex = &*handle;
    Box::into_raw(Box::new(mtx.lock_write()))
}

/// # Safety
/// `guard` must be a pointer returned by [`picasso_mutex_lock`], used
/// exactly once.
#[no_mangle]
pub unsafe extern "C" fn picasso_mutex_unlock(guard: *mut WriteGuard<'static>) {
    drop(Box::from_raw(guard));
}

/// Acquire `handle` for reading, cooperatively yielding while a writer
/// holds it.
///
/// # Safety
/// `handle` must be a live handle from [`picasso_mutex_create`] that
/// outlives the returned guard.
#[no_mangle]
pub unsafe extern "C" fn picasso_rwmutex_read_lock(handle: *mut TaskRwMutex) -> *mut ReadGuard<'static> {
    let mtx: &'static TaskRwMutex = &*handle;
    Box::into_raw(Box::new(mtx.lock_read()))
}

/// # Safety
/// `guard` must be a pointer returned by [`picasso_rwmutex_read_lock`],
/// used exactly once.
#[no_mangle]
pub unsafe extern "C" fn picasso_rwmutex_read_unlock(guard: *mut ReadGuard<'static>) {
    drop(Box::from_raw(guard));
}

/// Acquire `handle` for writing, excluding both readers and writers.
///
/// # Safety
/// `handle` must be a live handle from [`picasso_mutex_create`] that
/// outlives the returned guard.
#[no_mangle]
pub unsafe extern "C" fn picasso_rwmutex_write_lock(handle: *mut TaskRwMutex) -> *mut WriteGuard<'static> {
    let mtx: &'static TaskRwMutex = &*handle;
    Box::into_raw(Box::new(mtx.lock_write()))
}

/// # Safety
/// `guard` must be a pointer returned by [`picasso_rwmutex_write_lock`],
/// used exactly once.
#[no_mangle]
pub unsafe extern "C" fn picasso_rwmutex_write_unlock(guard: *mut WriteGuard<'static>) {
    drop(Box::from_raw(guard));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutex_create_lock_unlock_destroy_round_trip() {
        let handle = picasso_mutex_create(false);
        unsafe {
            let guard = picasso_mutex_lock(handle);
            assert!(!guard.is_null());
            picasso_mutex_unlock(guard);
            picasso_mutex_destroy(handle);
        }
    }

    #[test]
    fn test_rwmutex_two_readers_coexist() {
        let handle = picasso_mutex_create(true);
        unsafe {
            let r1 = picasso_rwmutex_read_lock(handle);
            let r2 = picasso_rwmutex_read_lock(handle);
            assert_eq!((*handle).readers_active(), 2);
            picasso_rwmutex_read_unlock(r1);
            picasso_rwmutex_read_unlock(r2);
            picasso_mutex_destroy(handle);
        }
    }
}
