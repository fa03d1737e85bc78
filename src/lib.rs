pub mod config;
pub mod opcode;
pub mod state;
pub mod store;
pub mod tracers;
pub mod utils;
pub mod vm_error;

pub use config::{new_tracer, TracerConfig};
pub use opcode::Opcode;
pub use state::{Contract, Memory, Stack};
pub use store::{InMemory, SharedState, StateReader};
pub use tracers::no_tracer::NoTracer;
pub use tracers::script::{ScriptConfig, ScriptTracer};
pub use tracers::stop::StopHandle;
pub use tracers::struct_logger::{LogConfig, StructLogger};
pub use tracers::tracer::{CallEnd, CallStart, StepSnapshot, Tracer};
pub use vm_error::{TracerError, VmError};
