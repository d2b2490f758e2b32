mod internal;

pub mod error;
pub mod imports;
pub mod instance;
pub mod memory;
pub mod module;
pub mod runtime;
pub mod syntax;

/// Tracing target for events raised by the guest through import shims.
pub const TRACE_TARGET_GUEST: &str = "tsbridge::guest";

pub use error::{Error, HandleKind, Result};
pub use imports::{HeapLayout, ImportShim, ImportTable};
pub use instance::Instance;
pub use memory::Address;
pub use module::{ExportedFunction, ExportedMemory, GuestModule, ImportKind, ImportedItem};
pub use runtime::{Runtime, RuntimeBuilder};
pub use syntax::{NODE_SIZE, Node, Parser, Tree};
