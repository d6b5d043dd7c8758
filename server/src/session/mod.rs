pub mod registry;
pub mod state;

pub use registry::*;
pub use state::*;
