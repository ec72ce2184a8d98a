//! Hardware-agnostic `ttir` graph representation.

pub mod infer;
pub mod registry;
pub mod spec;

pub use registry::{GraphId, Operand, OperandRegistry, Producer};
pub use spec::*;
