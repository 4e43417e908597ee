use reshape_dxil::DxilError;
use reshape_il::IlError;
use reshape_spirv::SpvError;
use thiserror::Error;

use crate::registry::ShaderHandle;

/// A native pipeline creation call that failed. Recorded per job; siblings in the same batch
/// still compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("native pipeline compilation failed: {reason}")]
pub struct NativeCompileFailure {
    pub reason: String,
}

impl NativeCompileFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentError {
    #[error("unrecognised shader container ({len} bytes)")]
    UnknownFormat { len: usize },

    #[error(transparent)]
    Spirv(#[from] SpvError),

    #[error(transparent)]
    Dxil(#[from] DxilError),

    #[error(transparent)]
    Il(#[from] IlError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("shader {0:?} is not registered")]
    UnknownShader(ShaderHandle),
}
