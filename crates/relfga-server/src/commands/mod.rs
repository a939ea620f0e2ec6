//! Commands that mutate stores and their tuples.

mod create_store;
mod delete_store;
mod write;

pub use create_store::CreateStoreCommand;
pub use delete_store::DeleteStoreCommand;
pub use write::WriteCommand;
