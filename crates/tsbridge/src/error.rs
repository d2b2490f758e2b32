use thiserror::Error;

use crate::memory::Address;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Kind of guest object a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Parser,
    Tree,
    Node,
}

impl core::fmt::Display for HandleKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Parser => "parser",
            Self::Tree => "tree",
            Self::Node => "node",
        })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Engine could not be configured, or a compile worker failed to
    /// produce or serialize a module.
    #[error("wasmtime engine error: {0}")]
    Engine(#[source] anyhow::Error),

    /// Module image is not a valid WebAssembly module.
    #[error("failed to compile guest module: {0}")]
    Compile(#[source] anyhow::Error),

    /// Unresolved import, mistyped import/export, or a trap during guest start.
    #[error("failed to instantiate guest module: {0}")]
    Instantiation(#[source] anyhow::Error),

    /// Module does not export its linear memory under the expected name.
    #[error("guest module does not export linear memory `{name}`")]
    MissingMemoryExport { name: String },

    /// Guest allocator returned the null address.
    #[error("guest allocation of {size} bytes failed")]
    AllocationFailed { size: u64 },

    /// Access outside the current bounds of guest linear memory.
    #[error("out of bounds guest memory access at {addr} (len {len}, memory size {memory_size})")]
    OutOfBounds {
        addr: Address,
        len: u64,
        memory_size: u64,
    },

    /// Guest export trapped or could not be called.
    #[error("guest call `{function}` failed: {source}")]
    Call {
        function: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Guest rejected the language passed to `ts_parser_set_language`.
    #[error("guest rejected language at {language}")]
    InvalidLanguage { language: Address },

    /// Guest produced no tree, typically because no language is configured.
    #[error("parse failed: guest returned a null tree")]
    ParseFailed,

    /// Operation on a handle that was already deleted or whose instance was closed.
    #[error("{kind} handle used after it was deleted")]
    UseAfterFree { kind: HandleKind },

    /// Memory or parser operation on an instance after [`Instance::close`](crate::Instance::close).
    #[error("guest instance has been closed")]
    InstanceClosed,

    /// Filesystem I/O error (module image, compile cache).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn call(function: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Call {
            function,
            source: source.into(),
        }
    }

    /// Whether this error aborts session startup rather than a single operation.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Engine(_)
                | Self::Compile(_)
                | Self::Instantiation(_)
                | Self::MissingMemoryExport { .. }
        )
    }
}
