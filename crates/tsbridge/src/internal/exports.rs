use anyhow::Context as _;
use wasmtime::{Instance, Store, TypedFunc, WasmParams, WasmResults};

use crate::internal::state::HostState;

pub const PARSER_NEW: &str = "ts_parser_new_wasm";
pub const PARSER_DELETE: &str = "ts_parser_delete";
pub const PARSER_SET_LANGUAGE: &str = "ts_parser_set_language";
pub const PARSER_PARSE: &str = "ts_parser_parse_wasm";
pub const TREE_DELETE: &str = "ts_tree_delete";
pub const TREE_ROOT_NODE: &str = "ts_tree_root_node_wasm";
pub const NODE_TO_STRING: &str = "ts_node_to_string_wasm";
pub const MALLOC: &str = "malloc";
pub const FREE: &str = "free";

/// Guest exports the bridge calls, resolved once with their exact signatures.
pub struct GuestExports {
    pub parser_new: TypedFunc<(), u32>,
    pub parser_delete: TypedFunc<u32, ()>,
    pub parser_set_language: TypedFunc<(u32, u32), u32>,
    pub parser_parse: TypedFunc<(u32, u32, u32, u32), u32>,
    pub tree_delete: TypedFunc<u32, ()>,
    pub tree_root_node: TypedFunc<(u32, u32), ()>,
    pub node_to_string: TypedFunc<u32, u32>,
    pub malloc: TypedFunc<u32, u32>,
    pub free: TypedFunc<u32, ()>,
}

impl GuestExports {
    /// # Errors
    /// Returns an error naming the first export that is missing or mistyped.
    pub fn resolve(store: &mut Store<HostState>, instance: &Instance) -> anyhow::Result<Self> {
        Ok(Self {
            parser_new: typed(store, instance, PARSER_NEW)?,
            parser_delete: typed(store, instance, PARSER_DELETE)?,
            parser_set_language: typed(store, instance, PARSER_SET_LANGUAGE)?,
            parser_parse: typed(store, instance, PARSER_PARSE)?,
            tree_delete: typed(store, instance, TREE_DELETE)?,
            tree_root_node: typed(store, instance, TREE_ROOT_NODE)?,
            node_to_string: typed(store, instance, NODE_TO_STRING)?,
            malloc: typed(store, instance, MALLOC)?,
            free: typed(store, instance, FREE)?,
        })
    }
}

fn typed<P: WasmParams, R: WasmResults>(
    store: &mut Store<HostState>,
    instance: &Instance,
    name: &str,
) -> anyhow::Result<TypedFunc<P, R>> {
    instance
        .get_typed_func::<P, R>(&mut *store, name)
        .with_context(|| format!("guest export `{name}`"))
}
