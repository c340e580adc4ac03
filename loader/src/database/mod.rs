mod base;
pub mod memory;
pub mod mysql;

pub use base::{Database, Transaction};
pub use memory::{MemoryDatabase, MemoryDbError, TransactionStats};
pub use mysql::MySqlDatabase;
