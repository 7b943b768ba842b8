pub mod engine;
pub mod installer;
pub mod signals;

pub use engine::{ProductionEngine, ReconciliationEngine};
pub use installer::ServiceInstaller;
pub use signals::{SignalHandler, SignalType};
