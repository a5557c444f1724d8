//! Node execution: compile, stage, run, cache.

pub mod compiler;
pub mod executor;
pub mod output;
pub mod runner;

use miette::Diagnostic;
use thiserror::Error;

pub use compiler::{compile, output_or_default, CompileError, CompiledScript};
pub use executor::execute;
pub use output::{ArmorError, OutputRecord, OUTPUT_SENTINEL};
pub use runner::{ExecLine, ExecStream, ProcessRunner, RunOutcome, ScriptRunner};

#[derive(Debug, Error, Diagnostic)]
pub enum ExecError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),

    #[error("script could not be staged to disk: {source}")]
    #[diagnostic(code(mangrove::exec::stage))]
    Stage {
        #[source]
        source: std::io::Error,
    },

    #[error("interpreter argv is empty")]
    #[diagnostic(
        code(mangrove::exec::interpreter),
        help("Construct the runner with at least the interpreter program name.")
    )]
    Interpreter,

    #[error("interpreter could not be spawned: {source}")]
    #[diagnostic(
        code(mangrove::exec::spawn),
        help("Check that the interpreter is installed and on PATH.")
    )]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    #[error("child output stream failed: {source}")]
    #[diagnostic(code(mangrove::exec::stream))]
    Stream {
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Armor(#[from] ArmorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] crate::storage::StorageError),
}

impl ExecError {
    pub(crate) fn stage(source: std::io::Error) -> Self {
        ExecError::Stage { source }
    }

    pub(crate) fn spawn(source: std::io::Error) -> Self {
        ExecError::Spawn { source }
    }

    pub(crate) fn stream(source: std::io::Error) -> Self {
        ExecError::Stream { source }
    }
}
