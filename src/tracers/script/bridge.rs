//! Marshalling between interpreter data and the script engine's value model.
//!
//! Scripts never see interpreter buffers: memory and stack arrive as copies
//! behind a [`ViewGuard`] that is revoked once the callback returns, 256-bit
//! quantities arrive as [`Word`]s, addresses and byte strings as blobs.

use std::rc::Rc;

use rhai::{Array, Blob, Dynamic, Engine, ImmutableString, Map, FLOAT, INT};
use u256::H160;

use super::views::{
    blob_to_address, int_or_word, ContractView, DbView, MemoryView, OpView, StackView, ViewGuard,
    Word,
};
use crate::{
    tracers::tracer::{CallEnd, CallStart, StepSnapshot},
    utils::{from_hex, is_precompiled, to_hex},
    vm_error::TracerError,
};

type ScriptResult<T> = Result<T, Box<rhai::EvalAltResult>>;

/// The `log` object handed to `step` and `fault`.
#[derive(Debug, Clone)]
pub struct StepLog {
    pub pc: u64,
    pub op: OpView,
    pub gas: u64,
    pub cost: u64,
    pub refund: u64,
    pub depth: usize,
    pub error: Option<String>,
    pub memory: MemoryView,
    pub stack: StackView,
    pub contract: ContractView,
}

impl StepLog {
    /// Copies what the script may look at. All views share `guard`.
    pub fn capture(step: &StepSnapshot<'_>, guard: &ViewGuard) -> Self {
        let contract = step.contract;
        Self {
            pc: step.pc,
            op: OpView(step.op),
            gas: step.gas,
            cost: step.cost,
            refund: step.refund,
            depth: step.depth,
            error: step.error.map(|err| err.to_string()),
            memory: MemoryView::copy_of(step.memory, guard.clone()),
            stack: StackView::copy_of(step.stack, guard.clone()),
            contract: ContractView {
                caller: contract.caller.as_bytes().to_vec(),
                address: contract.address.as_bytes().to_vec(),
                value: Word(contract.value),
                input: Rc::clone(&contract.input),
                code: Rc::clone(&contract.code),
                gas: contract.gas,
            },
        }
    }
}

/// The `ctx` map as known at call start.
pub fn start_ctx(start: &CallStart<'_>) -> Map {
    let mut ctx = Map::new();
    let kind = if start.create { "CREATE" } else { "CALL" };
    ctx.insert("type".into(), Dynamic::from(ImmutableString::from(kind)));
    ctx.insert("from".into(), Dynamic::from_blob(start.from.as_bytes().to_vec()));
    ctx.insert("to".into(), Dynamic::from_blob(start.to.as_bytes().to_vec()));
    ctx.insert("input".into(), Dynamic::from_blob(start.input.to_vec()));
    ctx.insert("gas".into(), int_or_word(start.gas));
    ctx.insert("value".into(), Dynamic::from(Word(start.value)));
    ctx
}

/// Adds the call outcome to `ctx`.
pub fn end_ctx(ctx: &mut Map, end: &CallEnd<'_>) {
    ctx.insert("output".into(), Dynamic::from_blob(end.output.to_vec()));
    ctx.insert("gas_used".into(), int_or_word(end.gas_used));
    ctx.insert(
        "time".into(),
        Dynamic::from(ImmutableString::from(format!("{:?}", end.duration))),
    );
    if let Some(err) = end.error {
        ctx.insert(
            "error".into(),
            Dynamic::from(ImmutableString::from(err.to_string())),
        );
    }
}

/// Converts a script value into the result payload.
pub fn to_json(value: &Dynamic) -> Result<serde_json::Value, TracerError> {
    let value = value.flatten_clone();
    if value.is::<()>() {
        return Ok(serde_json::Value::Null);
    }
    if value.is::<bool>() {
        return Ok(serde_json::Value::Bool(value.cast::<bool>()));
    }
    if value.is::<INT>() {
        return Ok(serde_json::Value::from(value.cast::<INT>()));
    }
    if value.is::<FLOAT>() {
        let float = value.cast::<FLOAT>();
        return serde_json::Number::from_f64(float)
            .map(serde_json::Value::Number)
            .ok_or_else(|| TracerError::Marshal(format!("{} is not a JSON number", float)));
    }
    if value.is::<ImmutableString>() {
        return Ok(serde_json::Value::String(
            value.cast::<ImmutableString>().to_string(),
        ));
    }
    if value.is::<char>() {
        return Ok(serde_json::Value::String(value.cast::<char>().to_string()));
    }
    if value.is::<Blob>() {
        return Ok(serde_json::Value::String(to_hex(&value.cast::<Blob>())));
    }
    if value.is::<Word>() {
        return Ok(serde_json::Value::String(value.cast::<Word>().to_string()));
    }
    if value.is::<OpView>() {
        return Ok(serde_json::Value::String(value.cast::<OpView>().name()));
    }
    if value.is::<Array>() {
        return value
            .cast::<Array>()
            .iter()
            .map(to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array);
    }
    if value.is::<Map>() {
        let mut object = serde_json::Map::new();
        for (key, item) in value.cast::<Map>().iter() {
            object.insert(key.to_string(), to_json(item)?);
        }
        return Ok(serde_json::Value::Object(object));
    }
    Err(TracerError::Marshal(format!(
        "cannot convert a value of type {} to JSON",
        value.type_name()
    )))
}

/// Registers every type and helper scripts can use.
pub fn register(engine: &mut Engine) {
    register_word(engine);
    register_step(engine);
    register_db(engine);
    register_helpers(engine);
}

fn register_word(engine: &mut Engine) {
    engine
        .register_type_with_name::<Word>("Word")
        .register_fn("to_string", |word: &mut Word| word.to_string())
        .register_fn("to_debug", |word: &mut Word| word.to_hex())
        .register_fn("to_hex", |word: &mut Word| word.to_hex())
        .register_fn("to_blob", |word: &mut Word| word.to_blob())
        .register_fn("to_int", |word: &mut Word| word.to_int())
        .register_fn("is_zero", |word: &mut Word| word.0.is_zero())
        .register_fn("+", |a: Word, b: Word| Word(a.0.overflowing_add(b.0).0))
        .register_fn("-", |a: Word, b: Word| Word(a.0.overflowing_sub(b.0).0))
        .register_fn("*", |a: Word, b: Word| Word(a.0.overflowing_mul(b.0).0))
        // Mixed with script integers, in either order.
        .register_fn("+", |a: Word, b: INT| -> ScriptResult<Word> {
            Ok(Word(a.0.overflowing_add(Word::from_int(b)?.0).0))
        })
        .register_fn("+", |a: INT, b: Word| -> ScriptResult<Word> {
            Ok(Word(Word::from_int(a)?.0.overflowing_add(b.0).0))
        })
        .register_fn("-", |a: Word, b: INT| -> ScriptResult<Word> {
            Ok(Word(a.0.overflowing_sub(Word::from_int(b)?.0).0))
        })
        .register_fn("-", |a: INT, b: Word| -> ScriptResult<Word> {
            Ok(Word(Word::from_int(a)?.0.overflowing_sub(b.0).0))
        })
        .register_fn("*", |a: Word, b: INT| -> ScriptResult<Word> {
            Ok(Word(a.0.overflowing_mul(Word::from_int(b)?.0).0))
        })
        .register_fn("*", |a: INT, b: Word| -> ScriptResult<Word> {
            Ok(Word(Word::from_int(a)?.0.overflowing_mul(b.0).0))
        })
        .register_fn("/", |a: Word, b: Word| -> ScriptResult<Word> {
            if b.0.is_zero() {
                return Err("word division by zero".into());
            }
            Ok(Word(a.0 / b.0))
        })
        .register_fn("%", |a: Word, b: Word| -> ScriptResult<Word> {
            if b.0.is_zero() {
                return Err("word division by zero".into());
            }
            Ok(Word(a.0 % b.0))
        })
        .register_fn("==", |a: Word, b: Word| a == b)
        .register_fn("!=", |a: Word, b: Word| a != b)
        .register_fn("<", |a: Word, b: Word| a < b)
        .register_fn("<=", |a: Word, b: Word| a <= b)
        .register_fn(">", |a: Word, b: Word| a > b)
        .register_fn(">=", |a: Word, b: Word| a >= b);
}

fn register_step(engine: &mut Engine) {
    engine
        .register_type_with_name::<OpView>("Op")
        .register_fn("to_string", |op: &mut OpView| op.name())
        .register_fn("to_debug", |op: &mut OpView| op.name())
        .register_fn("to_number", |op: &mut OpView| op.0.as_u8() as INT)
        .register_fn("is_push", |op: &mut OpView| op.0.is_push())
        .register_fn("==", |op: OpView, name: ImmutableString| op.name() == name.as_str())
        .register_fn("!=", |op: OpView, name: ImmutableString| op.name() != name.as_str());

    engine
        .register_type_with_name::<MemoryView>("Memory")
        .register_fn("length", MemoryView::length)
        .register_get("len", MemoryView::length)
        .register_fn("slice", MemoryView::slice)
        .register_fn("get_uint", MemoryView::get_uint)
        .register_indexer_get(MemoryView::byte_at);

    engine
        .register_type_with_name::<StackView>("Stack")
        .register_fn("length", StackView::length)
        .register_get("len", StackView::length)
        .register_fn("peek", StackView::peek)
        .register_indexer_get(StackView::peek);

    engine
        .register_type_with_name::<ContractView>("Contract")
        .register_get("caller", |c: &mut ContractView| c.caller.clone())
        .register_get("address", |c: &mut ContractView| c.address.clone())
        .register_get("value", |c: &mut ContractView| c.value)
        .register_get("input", |c: &mut ContractView| c.input.to_vec())
        .register_get("code", |c: &mut ContractView| c.code.to_vec())
        .register_get("gas", |c: &mut ContractView| int_or_word(c.gas));

    engine
        .register_type_with_name::<StepLog>("Log")
        .register_get("pc", |log: &mut StepLog| int_or_word(log.pc))
        .register_get("op", |log: &mut StepLog| log.op)
        .register_get("gas", |log: &mut StepLog| int_or_word(log.gas))
        .register_get("cost", |log: &mut StepLog| int_or_word(log.cost))
        .register_get("refund", |log: &mut StepLog| int_or_word(log.refund))
        .register_get("depth", |log: &mut StepLog| log.depth as INT)
        .register_get("error", |log: &mut StepLog| match &log.error {
            Some(err) => Dynamic::from(ImmutableString::from(err.as_str())),
            None => Dynamic::UNIT,
        })
        .register_get("memory", |log: &mut StepLog| log.memory.clone())
        .register_get("stack", |log: &mut StepLog| log.stack.clone())
        .register_get("contract", |log: &mut StepLog| log.contract.clone());
}

fn register_db(engine: &mut Engine) {
    engine
        .register_type_with_name::<DbView>("Db")
        .register_fn("get_balance", DbView::balance)
        .register_fn("get_nonce", DbView::nonce)
        .register_fn("get_code", DbView::code)
        .register_fn("get_state", DbView::storage)
        .register_fn("exists", DbView::exists);
}

fn register_helpers(engine: &mut Engine) {
    engine
        .register_fn("to_hex", |bytes: Blob| to_hex(&bytes))
        .register_fn("to_word", |bytes: Blob| Word::from_blob(&bytes))
        .register_fn("to_word", Word::from_int)
        .register_fn("to_word", |text: ImmutableString| Word::parse(text.as_str()))
        .register_fn("to_address", |bytes: Blob| address_blob(&bytes))
        .register_fn("to_address", |word: Word| address_blob(&word.to_blob()))
        .register_fn("to_address", |text: ImmutableString| -> ScriptResult<Blob> {
            let bytes = from_hex(text.as_str())
                .map_err(|e| format!("invalid address '{}': {}", text, e))?;
            Ok(address_blob(&bytes))
        })
        .register_fn("is_precompiled", |address: Blob| -> ScriptResult<bool> {
            Ok(is_precompiled(&blob_to_address(&address)?))
        });
}

/// Right-aligns `bytes` into 20 bytes, keeping the low end of longer inputs.
fn address_blob(bytes: &[u8]) -> Blob {
    let mut address = [0u8; 20];
    let take = bytes.len().min(20);
    address[20 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
    H160(address).as_bytes().to_vec()
}
