mod instance;
pub use instance::*;

mod physical_device;
pub use physical_device::*;

mod device;
pub use device::*;

mod queue;
pub use queue::*;

mod context;
pub use context::*;
