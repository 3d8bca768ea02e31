//! Stage observers
//!
//! Observers are notified synchronously, in declaration order, after each
//! stage succeeds and before the next stage starts. They cannot influence
//! the run; a slow observer simply delays the next stage.

use crate::pipeline::stage::StageResult;
use std::io::Write;
use std::sync::Mutex;
use tracing::{debug, info};

/// Notification sink for pipeline progress
pub trait StageObserver: Send + Sync {
    /// Called once per successfully executed stage
    fn on_stage_result(&self, result: &StageResult);

    /// Called right before a stage is invoked
    fn on_stage_started(&self, _index: usize, _stage_name: &str) {}
}

impl<F> StageObserver for F
where
    F: Fn(&StageResult) + Send + Sync,
{
    fn on_stage_result(&self, result: &StageResult) {
        self(result)
    }
}

/// Emits one structured log event per stage
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl StageObserver for LoggingObserver {
    fn on_stage_result(&self, result: &StageResult) {
        info!(
            stage = %result.stage_name,
            stage_index = result.stage_index,
            elapsed_ms = result.duration.as_millis() as u64,
            output_chars = result.output.chars().count(),
            "Agent responded"
        );
    }

    fn on_stage_started(&self, index: usize, stage_name: &str) {
        debug!(stage = %stage_name, stage_index = index, "Agent invoked");
    }
}

/// Prints each agent's reply under a banner, for interactive use
pub struct ConsoleObserver<W: Write + Send = std::io::Stdout> {
    out: Mutex<W>,
    width: usize,
}

impl ConsoleObserver {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleObserver<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            width: 50,
        }
    }

    /// Hand back the writer, mainly for inspecting buffered output
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn render(&self, out: &mut W, result: &StageResult) -> std::io::Result<()> {
        let rule = "=".repeat(self.width);
        writeln!(out)?;
        writeln!(out, "{rule}")?;
        writeln!(out, "{}", result.stage_name)?;
        writeln!(out, "{rule}")?;
        writeln!(out, "{}", result.output.trim_end())?;
        writeln!(out)?;
        out.flush()
    }
}

impl<W: Write + Send> StageObserver for ConsoleObserver<W> {
    fn on_stage_result(&self, result: &StageResult) {
        let mut out = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = self.render(&mut out, result) {
            debug!(error = %e, "Console observer failed to write");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn result(name: &str, output: &str) -> StageResult {
        StageResult {
            stage_name: name.to_string(),
            stage_index: 0,
            output: output.to_string(),
            duration: Duration::from_millis(3),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_closure_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer = move |r: &StageResult| sink.lock().unwrap().push(r.stage_name.clone());

        observer.on_stage_result(&result("Analyzer", "x"));
        observer.on_stage_started(1, "Optimizer");

        assert_eq!(*seen.lock().unwrap(), vec!["Analyzer".to_string()]);
    }

    #[test]
    fn test_console_observer_renders_banner() {
        let observer = ConsoleObserver::new(Vec::new());
        observer.on_stage_result(&result("ReviewerAgent", "Final post\n"));

        let text = String::from_utf8(observer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "=".repeat(50));
        assert_eq!(lines[2], "ReviewerAgent");
        assert_eq!(lines[4], "Final post");
    }

    #[test]
    fn test_logging_observer_does_not_panic_without_subscriber() {
        let observer = LoggingObserver;
        observer.on_stage_started(0, "Analyzer");
        observer.on_stage_result(&result("Analyzer", "ok"));
    }
}
