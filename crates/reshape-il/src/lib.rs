//! Format-independent shader program model and the instrumentation framework built on it.
//!
//! Backends decode a shader into a [`Program`], features rewrite it through [`Emitter`],
//! [`visit_instructions`] and [`split_guarded`], and backends then re-encode it. Instructions
//! decoded from the original binary carry a [`Source::Original`] offset so unmodified code can be
//! copied back verbatim.

#![forbid(unsafe_code)]

pub mod analysis;
mod block;
mod config;
mod constant;
mod emitter;
mod error;
mod export;
mod feature;
mod function;
mod id;
mod instruction;
mod instrument;
/// Textual dumps of programs, for logs and test failures.
pub mod pretty;
mod program;
mod shape;
mod source_location;
mod types;
mod visitor;

pub use crate::analysis::{DominatorTree, UseSite, UserAnalysis};
pub use crate::block::{BasicBlock, BasicBlockFlags};
pub use crate::config::{FeatureBitSet, InstrumentationConfig};
pub use crate::constant::{Constant, ConstantMap, ConstantValue};
pub use crate::emitter::Emitter;
pub use crate::error::{IlError, Result};
pub use crate::export::{
    ExportId, ExportLayout, ExportSchema, ShaderExportHost, INTERNAL_NAME_PREFIX,
};
pub use crate::feature::{Feature, FeatureEnv, FeatureHookTable, FeatureRegistry};
pub use crate::function::{Function, FunctionFlags, Parameter};
pub use crate::id::{Id, IdentifierMap};
pub use crate::instruction::{
    BinaryOp, CompareOp, ControlFlow, Instruction, InstructionKind, OpCode, PhiValue, Source,
    SourceAssociation, SwitchCase,
};
pub use crate::instrument::{split_guarded, SplitBlocks};
pub use crate::program::{
    EntryPoint, Program, ProgramMetadata, ResourceBinding, SourceFile, Stage, Variable,
};
pub use crate::shape::{BlockShape, EntryShape, FunctionShape, ProgramShape};
pub use crate::source_location::{SourceLocation, SourceLocationHost};
pub use crate::types::{SamplerMode, TextureDimension, Type, TypeMap};
pub use crate::visitor::{visit_instructions, InstructionRef, VisitContext};
