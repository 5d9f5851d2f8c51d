pub mod blob;
pub mod table;

pub use blob::MemoryBlobService;
pub use table::MemoryTableService;
