pub mod config;
pub mod row;
pub mod status;
pub mod table;
