pub mod memory;
pub mod postgres;
pub mod storage;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use storage::{BlobStorage, FsStorage, MemoryStorage};
pub use store::Store;
