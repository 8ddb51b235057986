//! Per-compilation options

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::codegen::CodegenConfig;
use crate::error::{CompilerError, Result};

/// Shared cancellation switch, checked between compilation phases and units
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub codegen: CodegenConfig,
    /// Analyze circuits and functions on the rayon pool
    pub parallel: bool,
    pub cancel: Option<CancelFlag>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { codegen: CodegenConfig::default(), parallel: true, cancel: None }
    }
}

impl CompileOptions {
    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Fails with [`CompilerError::Cancelled`] once the flag is raised
    pub fn checkpoint(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.is_cancelled() => Err(CompilerError::Cancelled),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_after_cancel() {
        let flag = CancelFlag::new();
        let options = CompileOptions::default().with_cancel(flag.clone());
        assert!(options.checkpoint().is_ok());

        flag.cancel();
        assert!(matches!(options.checkpoint(), Err(CompilerError::Cancelled)));
    }

    #[test]
    fn test_defaults() {
        let options = CompileOptions::default();
        assert!(options.parallel);
        assert!(options.cancel.is_none());
        assert!(options.sequential().checkpoint().is_ok());
    }
}
