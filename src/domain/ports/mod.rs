pub mod alerts;
pub mod probe;
pub mod storage;

pub use alerts::{AlertCallback, FnAlertCallback};
pub use probe::HealthProbe;
pub use storage::{ConnectionFactory, StorageConnection};
