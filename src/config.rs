use serde::Deserialize;
use tracing::debug;

use crate::{
    store::SharedState,
    tracers::{
        no_tracer::NoTracer,
        script::{ScriptConfig, ScriptTracer},
        struct_logger::{LogConfig, StructLogger},
        tracer::Tracer,
    },
    vm_error::TracerError,
};

/// Which tracer to build for a call, as callers describe it.
///
/// ```json
/// {"tracer": "script", "code": "fn step(log) {} fn result(ctx) { 0 }", "maxOperations": 10000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "tracer", rename_all = "camelCase")]
pub enum TracerConfig {
    Noop,
    Struct(LogConfig),
    Script {
        code: String,
        #[serde(flatten)]
        options: ScriptConfig,
    },
}

impl Default for TracerConfig {
    fn default() -> Self {
        TracerConfig::Struct(LogConfig::default())
    }
}

impl TracerConfig {
    pub fn from_json(text: &str) -> Result<Self, TracerError> {
        serde_json::from_str(text).map_err(|e| TracerError::Config(e.to_string()))
    }
}

/// Builds a fresh tracer for one call. Script problems surface here, before
/// anything executes.
pub fn new_tracer(
    config: &TracerConfig,
    state: Option<SharedState>,
) -> Result<Box<dyn Tracer>, TracerError> {
    debug!(?config, "building tracer");
    Ok(match config {
        TracerConfig::Noop => Box::new(NoTracer::new()),
        TracerConfig::Struct(options) => Box::new(StructLogger::new(options.clone(), state)),
        TracerConfig::Script { code, options } => {
            Box::new(ScriptTracer::new(code, options, state)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_variant() {
        assert_eq!(
            TracerConfig::from_json(r#"{"tracer": "noop"}"#).unwrap(),
            TracerConfig::Noop
        );
        assert_eq!(
            TracerConfig::from_json(r#"{"tracer": "struct", "disableMemory": true, "limit": 5}"#)
                .unwrap(),
            TracerConfig::Struct(LogConfig {
                disable_memory: true,
                limit: 5,
                ..Default::default()
            })
        );
        assert_eq!(
            TracerConfig::from_json(r#"{"tracer": "script", "code": "x", "maxOperations": 7}"#)
                .unwrap(),
            TracerConfig::Script {
                code: "x".to_string(),
                options: ScriptConfig {
                    max_operations: 7,
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn rejects_unknown_tracers() {
        assert!(matches!(
            TracerConfig::from_json(r#"{"tracer": "callTracer"}"#),
            Err(TracerError::Config(_))
        ));
        assert!(matches!(
            TracerConfig::from_json("not json"),
            Err(TracerError::Config(_))
        ));
    }

    #[test]
    fn script_errors_surface_at_construction() {
        let missing_result = TracerConfig::Script {
            code: "fn step(log) {}".to_string(),
            options: ScriptConfig::default(),
        };
        assert!(matches!(
            new_tracer(&missing_result, None),
            Err(TracerError::MissingHook("result"))
        ));

        let malformed = TracerConfig::Script {
            code: "fn step(log {".to_string(),
            options: ScriptConfig::default(),
        };
        assert!(matches!(
            new_tracer(&malformed, None),
            Err(TracerError::Compile(_))
        ));
    }
}
