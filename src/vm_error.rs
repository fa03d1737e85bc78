use thiserror::Error;

/// Faults reported by the interpreter. These are traced events, not tracer failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack limit reached")]
    StackOverflow,
    #[error("invalid opcode: 0x{0:02x}")]
    InvalidOpcode(u8),
    #[error("out of gas")]
    OutOfGas,
    #[error("invalid jump destination")]
    InvalidJump,
    #[error("write protection")]
    WriteProtection,
    #[error("max call depth exceeded")]
    DepthLimit,
    #[error("execution reverted")]
    Reverted,
    #[error("return data out of bounds")]
    ReturnDataOutOfBounds,
    /// The tracer asked the interpreter to abort.
    #[error("execution interrupted by tracer")]
    Interrupted,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TracerError {
    #[error("invalid tracer script: {0}")]
    Compile(String),
    #[error("tracer script does not define the `{0}` hook")]
    MissingHook(&'static str),
    #[error("invalid tracer config: {0}")]
    Config(String),
    #[error("{message} in tracer hook '{hook}'")]
    Hook { hook: &'static str, message: String },
    #[error("Marshal Error: {0}")]
    Marshal(String),
    /// Tracing was aborted through a stop handle. `partial` holds whatever the
    /// tracer had accumulated when it noticed.
    #[error("{reason}")]
    Stopped {
        reason: String,
        partial: Option<serde_json::Value>,
    },
}

impl TracerError {
    pub fn is_stop(&self) -> bool {
        matches!(self, TracerError::Stopped { .. })
    }
}
