//! # Log sink used by the runner.
//!
//! [`Logger`] is a polymorphic sink with three severities. The runner calls
//! it inline from the transaction worker, so implementations must be cheap
//! and must never block. [`NopLogger`] (the default) discards everything;
//! [`ConsoleLogger`] prints with a severity prefix and exists mostly for
//! demos and debugging sessions.

/// Severity-tagged sink for runner diagnostics.
pub trait Logger: Send + Sync {
    fn debug(&self, msg: &str);
    fn info(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Discards all log output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopLogger;

impl Logger for NopLogger {
    fn debug(&self, _msg: &str) {}
    fn info(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
}

/// Prints log lines to stdout/stderr with a severity prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn debug(&self, msg: &str) {
        println!("[debug] {msg}");
    }

    fn info(&self, msg: &str) {
        println!("[info] {msg}");
    }

    fn error(&self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}
