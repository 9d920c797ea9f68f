pub mod connection;
pub mod models;
pub mod recorder;
pub mod repository;

pub use connection::DatabaseConnection;
pub use models::*;
pub use recorder::spawn_execution_recorder;
pub use repository::*;
