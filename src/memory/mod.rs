pub(crate) mod block;
pub(crate) mod block_list;
pub(crate) mod loom_tests;
pub(crate) mod pool;
pub mod stats;
pub(crate) mod typed;
pub(crate) mod vm;

#[cfg(test)]
crate::sync::static_rwlock! {
    pub static TEST_MUTEX: crate::sync::RwLock<()> = crate::sync::RwLock::new(());
}
