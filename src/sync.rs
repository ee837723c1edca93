// Unified synchronization primitive shim.
//
// Under `cfg(loom)`, re-exports from the `loom` crate.  Otherwise, re-exports
// from `std`.
//
// **Every** file in the crate must import sync primitives through this module.
// A direct `use std::sync::atomic::*` would bypass loom's scheduler and
// silently break the model tests.

// ---------------------------------------------------------------------------
// atomic
// ---------------------------------------------------------------------------
pub(crate) mod atomic {
    #[cfg(loom)]
    pub(crate) use loom::sync::atomic::{AtomicIsize, Ordering};

    #[cfg(not(loom))]
    pub(crate) use std::sync::atomic::{AtomicIsize, Ordering};
}

// ---------------------------------------------------------------------------
// sync (Mutex, Arc, RwLock)
//
// Only tests share state between threads; the pool itself is single-owner.
// ---------------------------------------------------------------------------
#[cfg(all(test, loom))]
pub(crate) use loom::sync::{Arc, Mutex, RwLock};

#[cfg(all(test, not(loom)))]
pub(crate) use std::sync::RwLock;


// ---------------------------------------------------------------------------
// OnceLock
//
// Only the mmap backend caches anything; the loom/miri backend has a fixed
// page size, so no loom stand-in is needed.
// ---------------------------------------------------------------------------
#[cfg(all(unix, not(any(loom, miri))))]
pub(crate) use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Static initialisation helpers
//
// loom atomics and RwLock are not const-constructible.  These macros create
// statics that work under both loom and std.
// ---------------------------------------------------------------------------

/// Declare a `pub static` atomic.  Under std, uses `const` init.  Under loom,
/// uses `loom::lazy_static!` so the value is re-created for each model run.
///
/// Usage: `static_atomic! { pub static NAME: Type = init_expr; }`
macro_rules! static_atomic {
    (pub static $NAME:ident : $Ty:ty = $init:expr ;) => {
        #[cfg(not(loom))]
        pub static $NAME: $Ty = $init;

        #[cfg(loom)]
        loom::lazy_static! {
            pub static ref $NAME: $Ty = $init;
        }
    };
}
pub(crate) use static_atomic;

/// Declare a `pub static` `RwLock`.  Under std, uses `const` init.  Under
/// loom, uses `loom::lazy_static!`.
#[cfg(test)]
macro_rules! static_rwlock {
    (pub static $NAME:ident : $Ty:ty = $init:expr ;) => {
        #[cfg(not(loom))]
        pub static $NAME: $Ty = $init;

        #[cfg(loom)]
        loom::lazy_static! {
            pub static ref $NAME: $Ty = $init;
        }
    };
}
#[cfg(test)]
pub(crate) use static_rwlock;
