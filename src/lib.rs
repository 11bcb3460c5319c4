pub mod api;
pub mod app;
pub mod config;
pub mod counter;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod progress;
pub mod reconcile;
pub mod storage;
pub mod ui;

pub use api::ApiClient;
pub use config::{ClientConfig, CounterSettings};
pub use counter::{CounterBackend, CounterSnapshot, CounterSync, UserCounter};
pub use errors::ClientError;
pub use reconcile::{Direction, Reconciler};
