pub use linkme;

pub mod builder;
pub mod compile;
pub mod error;
pub mod flatbuffer;
pub mod golden;
pub mod ir;
pub mod lower;
pub mod text_ir;
pub mod verify;
mod env;

pub use builder::GraphBuilder;
pub use compile::{compile_case, run_cases, CaseReport, CompileOptions, TargetOutcome};
pub use error::{BuildError, CompileError, CompileResult};
pub use ir::{DType, Graph, Operand, TensorSpec};
pub use lower::{lower, lower_for, LoweredGraph, LoweringError};
pub use verify::{verify, VerificationError};
