pub mod negotiation;
pub mod registry;

pub use negotiation::{select, Selection};
pub use registry::{CompressionRegistry, Encoding};
