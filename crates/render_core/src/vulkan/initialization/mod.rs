pub mod adapter;
pub mod context;
pub mod instance;

pub use context::DeviceContext;
