#[cfg(not(any(unix, loom, miri)))]
compile_error!("fixsized needs an mmap-capable (unix) target.");

pub(crate) mod sync;

// public module: contains implementation details (hidden via pub(crate))
// and the diagnostics counters
pub mod memory;

// engine
pub use memory::block::{BlockGeometry, HEADER_SIZE, SLOT_ALIGN};
pub use memory::pool::{DEFAULT_MIN_SLOTS_PER_PAGE, PoolStats, SlabPool, SlabPoolConfig};

// typed front end
pub use memory::typed::FixSizedAllocator;

// mgmt/stats
pub use memory::stats::{MemoryStats, snapshot as memory_stats};

// errors
pub use memory::vm::VmError;
