//! Tracer driven by a user-supplied [rhai](https://rhai.rs) script.
//!
//! The script must define `step` and `result` and may define `start`, `fault`
//! and `end`. Its top-level statements run once at construction and their
//! value becomes the accumulator every hook receives as `this`:
//!
//! ```text
//! fn step(log) { this.count += 1; }
//! fn result(ctx) { this.count }
//! #{ count: 0 }
//! ```
//!
//! Hooks are offered `(log, db)` for steps and `(ctx, db)` for the call
//! boundaries and may declare fewer parameters.

mod bridge;
mod views;

use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Map, Scope, AST};
use serde::Deserialize;
use tracing::{debug, warn};

use self::bridge::StepLog;
use self::views::{DbView, ViewGuard};
use super::stop::StopHandle;
use super::tracer::{CallEnd, CallStart, StepSnapshot, Tracer};
use crate::{store::SharedState, vm_error::TracerError};

pub use self::views::Word;

const STEP_HOOK: &str = "step";
const RESULT_HOOK: &str = "result";
const START_HOOK: &str = "start";
const FAULT_HOOK: &str = "fault";
const END_HOOK: &str = "end";

/// Every hook is offered two arguments: `(log, db)` or `(ctx, db)`.
const MAX_HOOK_PARAMS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScriptConfig {
    /// Operation budget for each hook invocation, 0 for unbounded.
    pub max_operations: u64,
    pub max_call_levels: usize,
    /// Nesting limit for expressions, both at top level and inside functions.
    pub max_expr_depth: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_levels: 64,
            max_expr_depth: 64,
        }
    }
}

/// Parameter counts of the hooks the script defines.
#[derive(Debug, Clone, Copy)]
struct Hooks {
    step: usize,
    result: usize,
    start: Option<usize>,
    fault: Option<usize>,
    end: Option<usize>,
}

impl Hooks {
    fn find(ast: &AST) -> Result<Self, TracerError> {
        Ok(Self {
            step: Self::arity(ast, STEP_HOOK)?.ok_or(TracerError::MissingHook(STEP_HOOK))?,
            result: Self::arity(ast, RESULT_HOOK)?.ok_or(TracerError::MissingHook(RESULT_HOOK))?,
            start: Self::arity(ast, START_HOOK)?,
            fault: Self::arity(ast, FAULT_HOOK)?,
            end: Self::arity(ast, END_HOOK)?,
        })
    }

    /// The widest callable overload of `name`, `None` if the script does not define it.
    fn arity(ast: &AST, name: &'static str) -> Result<Option<usize>, TracerError> {
        let defined: Vec<usize> = ast
            .iter_functions()
            .filter(|f| f.name == name)
            .map(|f| f.params.len())
            .collect();
        let callable = defined.iter().copied().filter(|&n| n <= MAX_HOOK_PARAMS).max();
        match (callable, defined.iter().min()) {
            (Some(arity), _) => Ok(Some(arity)),
            (None, None) => Ok(None),
            (None, Some(params)) => Err(TracerError::Compile(format!(
                "hook `{}` takes at most {} parameters, found {}",
                name, MAX_HOOK_PARAMS, params
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Running,
    /// A hook failed; nothing more runs.
    Stopped(TracerError),
    Completed,
}

pub struct ScriptTracer {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    hooks: Hooks,
    /// The accumulator, bound as `this` in every hook.
    state: Dynamic,
    ctx: Map,
    db: Dynamic,
    phase: Phase,
    result: Option<Result<serde_json::Value, TracerError>>,
    stop: StopHandle,
}

impl ScriptTracer {
    /// Compiles `code` and runs its top level. Fails if the script does not
    /// parse, lacks a required hook, or its top level raises. `reader` backs
    /// the `db` argument; without one hooks receive `()`.
    pub fn new(
        code: &str,
        config: &ScriptConfig,
        reader: Option<SharedState>,
    ) -> Result<Self, TracerError> {
        let stop = StopHandle::new();
        let mut engine = Engine::new();
        bridge::register(&mut engine);
        if config.max_operations > 0 {
            engine.set_max_operations(config.max_operations);
        }
        engine.set_max_call_levels(config.max_call_levels);
        engine.set_max_expr_depths(config.max_expr_depth, config.max_expr_depth);
        // A stop request also ends a hook that is still running.
        let watcher = stop.clone();
        engine.on_progress(move |_| watcher.is_stopped().then_some(Dynamic::UNIT));
        engine.on_print(|text| debug!(target: "vm_tracer::script", "{}", text));
        engine.on_debug(|text, _source, pos| debug!(target: "vm_tracer::script", %pos, "{}", text));

        let ast = engine
            .compile(code)
            .map_err(|e| TracerError::Compile(e.to_string()))?;
        let hooks = Hooks::find(&ast)?;

        let mut scope = Scope::new();
        let initial = engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| TracerError::Compile(e.to_string()))?;
        let state = if initial.is::<()>() {
            Dynamic::from_map(Map::new())
        } else {
            initial
        };
        debug!(?hooks, "script tracer ready");

        let db = match reader {
            Some(state) => Dynamic::from(DbView { state }),
            None => Dynamic::UNIT,
        };

        Ok(Self {
            engine,
            ast,
            scope,
            hooks,
            state,
            ctx: Map::new(),
            db,
            phase: Phase::Running,
            result: None,
            stop,
        })
    }

    fn call_hook(
        &mut self,
        hook: &'static str,
        arity: usize,
        args: Vec<Dynamic>,
    ) -> Result<Dynamic, TracerError> {
        let args: Vec<Dynamic> = args.into_iter().take(arity).collect();
        let options = CallFnOptions::new()
            .eval_ast(false)
            .bind_this_ptr(&mut self.state);
        let outcome = self.engine.call_fn_with_options::<Dynamic>(
            options,
            &mut self.scope,
            &self.ast,
            hook,
            args,
        );
        outcome.map_err(|err| match (*err, self.stop.error(None)) {
            (EvalAltResult::ErrorTerminated(..), Some(stopped)) => stopped,
            (err, _) => TracerError::Hook {
                hook,
                message: err.to_string(),
            },
        })
    }

    /// Records `err` as the terminal error of the call.
    fn fail(&mut self, err: TracerError) -> TracerError {
        if !err.is_stop() {
            warn!(%err, "tracer script failed");
        }
        self.phase = Phase::Stopped(err.clone());
        err
    }

    fn interrupted(&self) -> Option<TracerError> {
        if let Some(err) = self.stop.error(None) {
            return Some(err);
        }
        match &self.phase {
            Phase::Stopped(err) => Some(err.clone()),
            _ => None,
        }
    }

    fn run_step(
        &mut self,
        hook: &'static str,
        arity: Option<usize>,
        step: &StepSnapshot<'_>,
    ) -> Result<(), TracerError> {
        if let Some(err) = self.interrupted() {
            return Err(err);
        }
        let Some(arity) = arity else {
            return Ok(());
        };
        let guard = ViewGuard::new();
        let log = Dynamic::from(StepLog::capture(step, &guard));
        let outcome = self.call_hook(hook, arity, vec![log, self.db.clone()]);
        guard.revoke();
        outcome.map(|_| ()).map_err(|err| self.fail(err))
    }

    /// The stop error carrying the accumulator as it stands, once a stop was requested.
    fn stopped(&self) -> Option<TracerError> {
        if !self.stop.is_stopped() {
            return None;
        }
        self.stop.error(bridge::to_json(&self.state).ok())
    }

    fn compute_result(&mut self) -> Result<serde_json::Value, TracerError> {
        if let Phase::Stopped(err) = &self.phase {
            return Err(err.clone());
        }
        let ctx = Dynamic::from_map(self.ctx.clone());
        let value = self.call_hook(RESULT_HOOK, self.hooks.result, vec![ctx, self.db.clone()])?;
        bridge::to_json(&value)
    }
}

impl Tracer for ScriptTracer {
    fn capture_start(&mut self, start: &CallStart<'_>) -> Result<(), TracerError> {
        self.ctx = bridge::start_ctx(start);
        if let Some(err) = self.interrupted() {
            return Err(err);
        }
        if let Some(arity) = self.hooks.start {
            let ctx = Dynamic::from_map(self.ctx.clone());
            if let Err(err) = self.call_hook(START_HOOK, arity, vec![ctx, self.db.clone()]) {
                return Err(self.fail(err));
            }
        }
        Ok(())
    }

    fn capture_state(&mut self, step: &StepSnapshot<'_>) -> Result<(), TracerError> {
        self.run_step(STEP_HOOK, Some(self.hooks.step), step)
    }

    fn capture_fault(&mut self, step: &StepSnapshot<'_>) -> Result<(), TracerError> {
        self.run_step(FAULT_HOOK, self.hooks.fault, step)
    }

    fn capture_end(&mut self, end: &CallEnd<'_>) -> Result<(), TracerError> {
        bridge::end_ctx(&mut self.ctx, end);
        if self.interrupted().is_some() {
            return Ok(());
        }
        self.phase = Phase::Completed;
        if let Some(arity) = self.hooks.end {
            let ctx = Dynamic::from_map(self.ctx.clone());
            if let Err(err) = self.call_hook(END_HOOK, arity, vec![ctx, self.db.clone()]) {
                return Err(self.fail(err));
            }
        }
        Ok(())
    }

    fn get_result(&mut self) -> Result<serde_json::Value, TracerError> {
        if let Some(err) = self.stopped() {
            return Err(err);
        }
        if let Some(result) = &self.result {
            return result.clone();
        }
        let result = self.compute_result();
        // A stop may also have cut the `result` hook short.
        if let Some(err) = self.stopped() {
            return Err(err);
        }
        self.result = Some(result.clone());
        result
    }

    fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
}
