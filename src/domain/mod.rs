pub mod calculations;
pub mod formatting;
pub mod gas_payload;
pub mod legacy;
pub mod models;
pub mod notifications;
pub mod session_state;
pub mod stats;
