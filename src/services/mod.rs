mod sync;

pub use sync::SyncService;
