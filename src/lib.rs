pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod highlight;
pub mod model;
pub mod staging;
pub mod storage;
pub mod ui;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use error::{PinError, StagingError};
pub use model::{Coordinate, PinCategory, PinId, PinRecord, PinStatus, Scope};
pub use storage::{PinBackend, PinStore};
