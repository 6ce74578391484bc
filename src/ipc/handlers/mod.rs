pub mod backup;
pub mod command;
pub mod core;
pub mod records;
pub mod relations;
pub mod schema;
pub mod settings;
pub mod table;
