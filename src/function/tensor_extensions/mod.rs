pub mod boolean;
pub mod float;

pub use boolean::*;
pub use float::*;
