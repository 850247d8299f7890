pub mod error;
pub mod manager;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod schema;
pub mod store;
pub mod unit_of_work;

pub use error::StoreError;
pub use manager::Database;
pub use memory::{MemoryStore, TableDef};
pub use postgres::PgStore;
pub use query::{Condition, ListQuery};
pub use store::{Row, Store, Table, Transaction};
pub use unit_of_work::UnitOfWork;
