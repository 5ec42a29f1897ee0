pub mod device;
pub mod session;

pub use device::Device;
pub use session::{Direction, LedgerSession};
