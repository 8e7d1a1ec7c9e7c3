pub mod plus_database;

pub use plus_database::{create_shared_plus_database, PlusDatabase, SharedPlusDatabase};
