use super::stop::StopHandle;
use super::tracer::{CallEnd, CallStart, StepSnapshot, Tracer};
use crate::vm_error::TracerError;

/// Observes nothing and produces `null`, but still honours stop requests.
#[derive(Debug, Default)]
pub struct NoTracer {
    stop: StopHandle,
}

impl NoTracer {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_stop(&self) -> Result<(), TracerError> {
        match self.stop.error(None) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Tracer for NoTracer {
    fn capture_start(&mut self, _start: &CallStart<'_>) -> Result<(), TracerError> {
        Ok(())
    }

    fn capture_state(&mut self, _step: &StepSnapshot<'_>) -> Result<(), TracerError> {
        self.check_stop()
    }

    fn capture_fault(&mut self, _step: &StepSnapshot<'_>) -> Result<(), TracerError> {
        self.check_stop()
    }

    fn capture_end(&mut self, _end: &CallEnd<'_>) -> Result<(), TracerError> {
        Ok(())
    }

    fn get_result(&mut self) -> Result<serde_json::Value, TracerError> {
        self.check_stop()?;
        Ok(serde_json::Value::Null)
    }

    fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
}
