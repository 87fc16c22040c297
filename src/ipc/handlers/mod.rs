pub mod backup_exchange;
pub mod clients;
pub mod columns;
pub mod core;
pub mod fees;
pub mod grid;
pub mod import_legacy;
pub mod session;
