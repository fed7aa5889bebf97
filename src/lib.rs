pub mod configuration;
pub mod container;
pub mod engine;
pub mod envstore;
pub mod errors;
pub mod events;
pub mod forms;
pub mod helpers;
pub mod models;
pub mod registry;
pub mod router;
pub mod routes;
pub mod startup;
pub mod telemetry;
