pub mod api;
pub mod backup;
pub mod connectivity;
pub mod db;
pub mod documents;
pub mod gas_sync;
pub mod legacy_migration;
