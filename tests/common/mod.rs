//! A small stack interpreter used to drive tracers through real call lifecycles.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use u256::{H160, U256};
use vm_tracer::{
    opcode::Opcode,
    store::{Account, InMemory, StorageKey},
    utils::{h256_into_u256, u256_into_address, u256_into_h256},
    CallEnd, CallStart, Contract, Memory, SharedState, Stack, StateReader, StepSnapshot,
    StopHandle, Tracer, TracerError, VmError,
};

pub const CALLER: u64 = 0xca11;
pub const CALLEE: u64 = 0xc0de;
const MAX_DEPTH: usize = 1024;

pub fn address(n: u64) -> H160 {
    u256_into_address(U256::from(n))
}

/// How one call ended, as seen by whoever made it.
#[derive(Debug)]
pub struct Outcome {
    pub output: Vec<u8>,
    pub gas_used: u64,
    pub error: Option<VmError>,
    /// Set when a tracer callback asked for the call to be aborted.
    pub aborted: Option<TracerError>,
}

enum Exit {
    Return(Vec<u8>),
    Revert(Vec<u8>),
    Fault(VmError),
    Aborted(TracerError),
}

pub struct Vm {
    pub state: Rc<RefCell<InMemory>>,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(InMemory::new_empty())),
        }
    }

    pub fn with_code(code: Vec<u8>) -> Self {
        let vm = Self::new();
        vm.deploy(address(CALLEE), code);
        vm
    }

    pub fn deploy(&self, at: H160, code: Vec<u8>) {
        self.state.borrow_mut().insert_account(
            at,
            Account {
                balance: U256::from(1_000),
                nonce: 1,
                code,
            },
        );
    }

    pub fn reader(&self) -> SharedState {
        self.state.clone()
    }

    /// Runs a top-level call to `CALLEE`.
    pub fn run(&self, tracer: &mut dyn Tracer, gas: u64) -> Outcome {
        self.call(tracer, address(CALLER), address(CALLEE), &[], gas)
    }

    pub fn call(
        &self,
        tracer: &mut dyn Tracer,
        from: H160,
        to: H160,
        input: &[u8],
        gas: u64,
    ) -> Outcome {
        let started = Instant::now();
        let start = CallStart {
            from,
            to,
            create: false,
            input,
            gas,
            value: U256::zero(),
        };
        if let Err(err) = tracer.capture_start(&start) {
            return Outcome {
                output: vec![],
                gas_used: 0,
                error: None,
                aborted: Some(err),
            };
        }

        let code = self.state.code(&to);
        let contract = Contract::new(from, to, U256::zero(), gas)
            .with_code(code)
            .with_input(input.to_vec());
        let mut remaining = gas;
        let exit = self.execute(tracer, &contract, &mut remaining, 0);

        let (output, error, aborted) = match exit {
            Exit::Return(output) => (output, None, None),
            Exit::Revert(output) => (output, Some(VmError::Reverted), None),
            Exit::Fault(err) => {
                remaining = 0;
                (vec![], Some(err), None)
            }
            Exit::Aborted(err) => (vec![], Some(VmError::Interrupted), Some(err)),
        };
        let gas_used = gas - remaining;
        let end = CallEnd {
            output: &output,
            gas_used,
            duration: started.elapsed(),
            error: error.as_ref(),
        };
        let end_error = tracer.capture_end(&end).err();
        Outcome {
            output,
            gas_used,
            error,
            aborted: aborted.or(end_error),
        }
    }

    fn execute(
        &self,
        tracer: &mut dyn Tracer,
        contract: &Contract,
        gas: &mut u64,
        depth: usize,
    ) -> Exit {
        let mut stack = Stack::new();
        let mut memory = Memory::new();
        let mut pc = 0usize;

        loop {
            let op = Opcode(contract.code.get(pc).copied().unwrap_or(0x00));
            let cost = gas_cost(op);
            let fault = check(op, cost, *gas, &stack, depth);

            let step = StepSnapshot {
                pc: pc as u64,
                op,
                gas: *gas,
                cost,
                refund: 0,
                memory: &memory,
                stack: &stack,
                contract,
                depth,
                error: fault.as_ref(),
            };
            if let Some(err) = &fault {
                if let Err(abort) = tracer.capture_fault(&step) {
                    return Exit::Aborted(abort);
                }
                return Exit::Fault(err.clone());
            }
            if let Err(abort) = tracer.capture_state(&step) {
                return Exit::Aborted(abort);
            }
            *gas -= cost;

            let frame = Frame {
                pc,
                contract,
                depth,
                stack: &mut stack,
                memory: &mut memory,
            };
            pc = match self.apply(tracer, op, frame, gas) {
                Ok(Step::Next) => pc + 1 + op.push_size(),
                Ok(Step::Jump(target)) => target,
                Ok(Step::Exit(exit)) => return exit,
                Err(err) => return Exit::Fault(err),
            };
        }
    }

    fn apply(
        &self,
        tracer: &mut dyn Tracer,
        op: Opcode,
        frame: Frame<'_>,
        gas: &mut u64,
    ) -> Result<Step, VmError> {
        let Frame {
            pc,
            contract,
            depth,
            stack,
            memory,
        } = frame;
        match op {
            Opcode::STOP => return Ok(Step::Exit(Exit::Return(vec![]))),
            Opcode::ADD => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a.overflowing_add(b).0)?;
            }
            Opcode::MUL => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a.overflowing_mul(b).0)?;
            }
            Opcode::SUB => {
                let (a, b) = (stack.pop()?, stack.pop()?);
                stack.push(a.overflowing_sub(b).0)?;
            }
            Opcode::POP => {
                stack.pop()?;
            }
            Opcode::MLOAD => {
                let offset = stack.pop()?.as_usize();
                memory.expand(offset + 32);
                stack.push(memory.read_word(offset))?;
            }
            Opcode::MSTORE => {
                let offset = stack.pop()?.as_usize();
                let value = stack.pop()?;
                memory.write_word(offset, value);
            }
            Opcode::SLOAD => {
                let slot = stack.pop()?;
                let key = StorageKey::new(contract.address, u256_into_h256(slot));
                stack.push(h256_into_u256(self.state.storage_read(key)))?;
            }
            Opcode::SSTORE => {
                let slot = stack.pop()?;
                let value = stack.pop()?;
                let key = StorageKey::new(contract.address, u256_into_h256(slot));
                self.state
                    .borrow_mut()
                    .storage_write(key, u256_into_h256(value));
            }
            Opcode::JUMP => {
                let target = stack.pop()?.as_usize();
                return jump(contract, target);
            }
            Opcode::JUMPI => {
                let target = stack.pop()?.as_usize();
                if !stack.pop()?.is_zero() {
                    return jump(contract, target);
                }
            }
            Opcode::JUMPDEST => {}
            Opcode::PC => stack.push(U256::from(pc as u64))?,
            Opcode::GAS => stack.push(U256::from(*gas))?,
            Opcode::RETURN | Opcode::REVERT => {
                let offset = stack.pop()?.as_usize();
                let size = stack.pop()?.as_usize();
                let output = memory.read(offset, size);
                return Ok(Step::Exit(if op == Opcode::RETURN {
                    Exit::Return(output)
                } else {
                    Exit::Revert(output)
                }));
            }
            Opcode::CALL => return self.nested_call(tracer, contract, gas, depth, stack, memory),
            op if op.is_push() => {
                let size = op.push_size();
                let start = (pc + 1).min(contract.code.len());
                let end = (pc + 1 + size).min(contract.code.len());
                let mut bytes = contract.code[start..end].to_vec();
                bytes.resize(size, 0);
                stack.push(U256::from_big_endian(&bytes))?;
            }
            op if (Opcode::DUP1.0..=Opcode::DUP16.0).contains(&op.0) => {
                let value = stack.peek((op.0 - Opcode::DUP1.0) as usize)?;
                stack.push(value)?;
            }
            op if (Opcode::SWAP1.0..=Opcode::SWAP16.0).contains(&op.0) => {
                stack.swap((op.0 - Opcode::SWAP1.0) as usize + 1)?;
            }
            op => return Err(VmError::InvalidOpcode(op.0)),
        }
        Ok(Step::Next)
    }

    fn nested_call(
        &self,
        tracer: &mut dyn Tracer,
        caller: &Contract,
        gas: &mut u64,
        depth: usize,
        stack: &mut Stack,
        memory: &mut Memory,
    ) -> Result<Step, VmError> {
        let requested = stack.pop()?;
        let to = u256_into_address(stack.pop()?);
        let value = stack.pop()?;
        let in_offset = stack.pop()?.as_usize();
        let in_size = stack.pop()?.as_usize();
        let out_offset = stack.pop()?.as_usize();
        let out_size = stack.pop()?.as_usize();

        let allowed = if requested > U256::from(*gas) {
            *gas
        } else {
            requested.as_u64()
        };
        let code = self.state.code(&to);
        let child = Contract::new(caller.address, to, value, allowed)
            .with_code(code)
            .with_input(memory.read(in_offset, in_size));
        let mut child_gas = allowed;
        let exit = self.execute(tracer, &child, &mut child_gas, depth + 1);
        *gas -= allowed - child_gas;

        let (success, output) = match exit {
            Exit::Return(output) => (true, output),
            Exit::Revert(output) => (false, output),
            Exit::Fault(_) => {
                *gas -= child_gas;
                (false, vec![])
            }
            Exit::Aborted(err) => return Ok(Step::Exit(Exit::Aborted(err))),
        };
        let copied = output.len().min(out_size);
        memory.write(out_offset, &output[..copied]);
        stack.push(U256::from(success as u8))?;
        Ok(Step::Next)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

struct Frame<'a> {
    pc: usize,
    contract: &'a Contract,
    depth: usize,
    stack: &'a mut Stack,
    memory: &'a mut Memory,
}

enum Step {
    Next,
    Jump(usize),
    Exit(Exit),
}

fn jump(contract: &Contract, target: usize) -> Result<Step, VmError> {
    if contract.code.get(target) != Some(&Opcode::JUMPDEST.0) {
        return Err(VmError::InvalidJump);
    }
    Ok(Step::Jump(target))
}

/// Faults detectable before the instruction runs.
fn check(op: Opcode, cost: u64, gas: u64, stack: &Stack, depth: usize) -> Option<VmError> {
    if op.name().is_none() || op == Opcode::INVALID {
        return Some(VmError::InvalidOpcode(op.0));
    }
    if stack.len() < stack_inputs(op) {
        return Some(VmError::StackUnderflow);
    }
    if cost > gas {
        return Some(VmError::OutOfGas);
    }
    if op == Opcode::CALL && depth + 1 >= MAX_DEPTH {
        return Some(VmError::DepthLimit);
    }
    None
}

fn stack_inputs(op: Opcode) -> usize {
    match op {
        Opcode::ADD | Opcode::MUL | Opcode::SUB | Opcode::MSTORE | Opcode::SSTORE => 2,
        Opcode::JUMPI | Opcode::RETURN | Opcode::REVERT => 2,
        Opcode::POP | Opcode::MLOAD | Opcode::SLOAD | Opcode::JUMP => 1,
        Opcode::CALL => 7,
        op if (Opcode::DUP1.0..=Opcode::DUP16.0).contains(&op.0) => {
            (op.0 - Opcode::DUP1.0) as usize + 1
        }
        op if (Opcode::SWAP1.0..=Opcode::SWAP16.0).contains(&op.0) => {
            (op.0 - Opcode::SWAP1.0) as usize + 2
        }
        _ => 0,
    }
}

fn gas_cost(op: Opcode) -> u64 {
    match op {
        Opcode::STOP | Opcode::RETURN | Opcode::REVERT => 0,
        Opcode::JUMPDEST => 1,
        Opcode::POP | Opcode::PC | Opcode::GAS => 2,
        Opcode::MUL => 5,
        Opcode::JUMP => 8,
        Opcode::JUMPI => 10,
        Opcode::SLOAD | Opcode::SSTORE | Opcode::CALL => 100,
        _ => 3,
    }
}

/// Forwards every callback to `inner` and records the sequence of events.
pub struct Recorder<T: Tracer> {
    pub inner: T,
    pub events: Vec<String>,
}

impl<T: Tracer> Recorder<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            events: vec![],
        }
    }
}

impl<T: Tracer> Tracer for Recorder<T> {
    fn capture_start(&mut self, start: &CallStart<'_>) -> Result<(), TracerError> {
        self.events.push("start".to_string());
        self.inner.capture_start(start)
    }

    fn capture_state(&mut self, step: &StepSnapshot<'_>) -> Result<(), TracerError> {
        self.events.push(format!("state {} {}", step.depth, step.op));
        self.inner.capture_state(step)
    }

    fn capture_fault(&mut self, step: &StepSnapshot<'_>) -> Result<(), TracerError> {
        self.events.push(format!("fault {} {}", step.depth, step.op));
        self.inner.capture_fault(step)
    }

    fn capture_end(&mut self, end: &CallEnd<'_>) -> Result<(), TracerError> {
        match end.error {
            Some(err) => self.events.push(format!("end {}", err)),
            None => self.events.push("end".to_string()),
        }
        self.inner.capture_end(end)
    }

    fn get_result(&mut self) -> Result<serde_json::Value, TracerError> {
        self.events.push("result".to_string());
        self.inner.get_result()
    }

    fn stop_handle(&self) -> StopHandle {
        self.inner.stop_handle()
    }
}
