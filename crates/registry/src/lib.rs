pub mod driver;
pub mod port_allocator;
pub mod session;
pub mod session_registry;

pub use driver::{ContainerDriver, ContainerHandle, CreateParams, DriverError};
pub use port_allocator::{PortAllocator, PortAllocatorError};
pub use session::{Handle, SessionEntry, SessionState};
pub use session_registry::{RegistryError, SessionRegistry, SessionRegistryConfig};
