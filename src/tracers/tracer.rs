use std::time::Duration;

use u256::{H160, U256};

use super::stop::StopHandle;
use crate::{
    opcode::Opcode,
    state::{Contract, Memory, Stack},
    vm_error::{TracerError, VmError},
};

/// Interpreter state at one execution step.
///
/// Everything behind a reference is owned by the interpreter and only valid for
/// the duration of the callback it is passed to; tracers copy what they keep.
#[derive(Debug, Clone, Copy)]
pub struct StepSnapshot<'a> {
    pub pc: u64,
    pub op: Opcode,
    pub gas: u64,
    /// May exceed `gas`, in which case the step is about to run out of gas.
    pub cost: u64,
    pub refund: u64,
    pub memory: &'a Memory,
    pub stack: &'a Stack,
    pub contract: &'a Contract,
    /// 0 for the top-level call.
    pub depth: usize,
    pub error: Option<&'a VmError>,
}

#[derive(Debug, Clone, Copy)]
pub struct CallStart<'a> {
    pub from: H160,
    pub to: H160,
    pub create: bool,
    pub input: &'a [u8],
    pub gas: u64,
    pub value: U256,
}

#[derive(Debug, Clone, Copy)]
pub struct CallEnd<'a> {
    pub output: &'a [u8],
    pub gas_used: u64,
    pub duration: Duration,
    /// `Some` iff the call did not complete successfully.
    pub error: Option<&'a VmError>,
}

/// The lifecycle an interpreter drives for one traced call:
/// `capture_start`, any number of `capture_state` / `capture_fault` in
/// execution order, `capture_end`, then `get_result`.
///
/// Returning an error from a capture method asks the interpreter to abort the call.
pub trait Tracer {
    fn capture_start(&mut self, start: &CallStart<'_>) -> Result<(), TracerError>;

    fn capture_state(&mut self, step: &StepSnapshot<'_>) -> Result<(), TracerError>;

    /// Called instead of `capture_state` for the instruction that faulted.
    fn capture_fault(&mut self, step: &StepSnapshot<'_>) -> Result<(), TracerError>;

    fn capture_end(&mut self, end: &CallEnd<'_>) -> Result<(), TracerError>;

    fn get_result(&mut self) -> Result<serde_json::Value, TracerError>;

    /// Handle onto this tracer's stop signal, usable from other threads.
    fn stop_handle(&self) -> StopHandle;

    /// Aborts tracing at the next callback. The first reason wins.
    fn stop(&self, reason: String) {
        self.stop_handle().stop(reason);
    }
}
