pub mod commands;
pub mod descriptor;
pub mod registry;

pub use commands::IndexCommand;
pub use descriptor::{IndexDescriptor, IndexModel};
pub use registry::DescriptorRegistry;
