use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use u256::{H160, H256};

use super::stop::StopHandle;
use super::tracer::{CallEnd, CallStart, StepSnapshot, Tracer};
use crate::{
    opcode::Opcode,
    store::{SharedState, StorageKey},
    utils::u256_into_h256,
    vm_error::TracerError,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    pub disable_stack: bool,
    pub disable_memory: bool,
    pub disable_storage: bool,
    /// Maximum number of recorded steps, 0 records everything.
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructLog {
    pub pc: u64,
    pub op: String,
    pub gas: u64,
    pub gas_cost: u64,
    pub depth: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub refund: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<BTreeMap<String, String>>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Records every step as a `structLogs` entry of a debug trace.
#[derive(Debug, Default)]
pub struct StructLogger {
    pub logs: Vec<StructLog>,
    config: LogConfig,
    state: Option<SharedState>,
    storage: HashMap<H160, BTreeMap<H256, H256>>,
    output: Vec<u8>,
    gas_used: u64,
    failed: bool,
    stop: StopHandle,
}

impl StructLogger {
    pub fn new(config: LogConfig, state: Option<SharedState>) -> Self {
        Self {
            config,
            state,
            ..Default::default()
        }
    }

    fn record(&mut self, step: &StepSnapshot<'_>) -> Result<(), TracerError> {
        if let Some(err) = self.stop.error(None) {
            return Err(err);
        }
        if self.config.limit != 0 && self.logs.len() >= self.config.limit {
            return Ok(());
        }

        let storage = if self.config.disable_storage {
            None
        } else {
            self.track_storage(step)
        };
        let stack = (!self.config.disable_stack).then(|| {
            step.stack
                .data()
                .iter()
                .map(|word| format!("{:#x}", word))
                .collect()
        });
        let memory = (!self.config.disable_memory).then(|| {
            step.memory
                .data()
                .chunks(32)
                .map(hex::encode)
                .collect()
        });

        self.logs.push(StructLog {
            pc: step.pc,
            op: step.op.to_string(),
            gas: step.gas,
            gas_cost: step.cost,
            // structLogs count depth from 1
            depth: step.depth + 1,
            refund: step.refund,
            error: step.error.map(|err| err.to_string()),
            stack,
            memory,
            storage,
        });
        Ok(())
    }

    /// Updates the storage view of the executing contract on SLOAD and SSTORE.
    fn track_storage(&mut self, step: &StepSnapshot<'_>) -> Option<BTreeMap<String, String>> {
        if step.op != Opcode::SLOAD && step.op != Opcode::SSTORE {
            return None;
        }
        let address = step.contract.address;
        let slot = u256_into_h256(step.stack.peek(0).ok()?);
        let value = if step.op == Opcode::SSTORE {
            u256_into_h256(step.stack.peek(1).ok()?)
        } else {
            self.state
                .as_ref()
                .map(|state| state.storage_read(StorageKey::new(address, slot)))
                .unwrap_or_default()
        };
        let contract_storage = self.storage.entry(address).or_default();
        contract_storage.insert(slot, value);
        Some(
            contract_storage
                .iter()
                .map(|(slot, value)| (hex::encode(slot), hex::encode(value)))
                .collect(),
        )
    }

    fn logs_json(&self) -> Result<serde_json::Value, TracerError> {
        serde_json::to_value(&self.logs).map_err(|e| TracerError::Marshal(e.to_string()))
    }
}

impl Tracer for StructLogger {
    fn capture_start(&mut self, _start: &CallStart<'_>) -> Result<(), TracerError> {
        Ok(())
    }

    fn capture_state(&mut self, step: &StepSnapshot<'_>) -> Result<(), TracerError> {
        self.record(step)
    }

    fn capture_fault(&mut self, step: &StepSnapshot<'_>) -> Result<(), TracerError> {
        self.record(step)
    }

    fn capture_end(&mut self, end: &CallEnd<'_>) -> Result<(), TracerError> {
        self.output = end.output.to_vec();
        self.gas_used = end.gas_used;
        self.failed = end.error.is_some();
        Ok(())
    }

    fn get_result(&mut self) -> Result<serde_json::Value, TracerError> {
        let logs = self.logs_json()?;
        if let Some(err) = self.stop.error(Some(logs.clone())) {
            return Err(err);
        }
        Ok(serde_json::json!({
            "gas": self.gas_used,
            "failed": self.failed,
            "returnValue": hex::encode(&self.output),
            "structLogs": logs,
        }))
    }

    fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
}
