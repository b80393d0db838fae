// pkd-core/src/lib.rs

pub mod executor;
pub mod install;
pub mod lock;
pub mod platform;
pub mod process;
pub mod receipt;
pub mod stage;
pub mod state;
pub mod uninstall;

#[cfg(test)]
mod testing;

// Re-export key types for the CLI crate
pub use executor::Executor;
pub use install::InstallOutcome;
pub use platform::{MacPlatform, Platform};
pub use receipt::{find_receipt, installed_receipts, InstallReceipt};
pub use uninstall::{UninstallOptions, UninstallReport};
