#![allow(dead_code)]

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tsbridge::{Address, GuestModule, Instance, Runtime};

/// Stand-in for a tree-sitter guest build: same imports and exports, with a
/// bump allocator and trivially shaped parser, tree and node objects.
///
/// Fixed addresses:
/// - `16`: number of live allocations
/// - `20`: bump pointer, seeded from `__heap_base`
/// - `28`: value of `__data_end` seen at start
/// - `64`: the string every node renders as
///
/// A language is a pointer to its ABI version; 13 through 15 are accepted and
/// `0xffffffff` makes the guest fail an assertion and trap.
///
/// The first byte of the parsed text selects a guest failure: `!` traps in
/// the parse itself, `#` in `ts_tree_root_node_wasm` and `~` in
/// `ts_tree_delete`.
pub const FAKE_GUEST: &str = r#"
(module
  (import "env" "abort" (func $abort))
  (import "env" "__assert_fail" (func $assert_fail (param i32 i32 i32 i32)))
  (import "env" "tree_sitter_log_callback" (func $log (param i32 i32)))
  (import "env" "tree_sitter_parse_callback" (func $parse_cb (param i32 i32 i32 i32 i32)))
  (import "env" "tree_sitter_progress_callback" (func $progress (param i32 i32) (result i32)))
  (import "env" "tree_sitter_query_progress_callback" (func $query_progress (param i32) (result i32)))
  (import "env" "emscripten_resize_heap" (func $resize_heap (param i32) (result i32)))
  (import "env" "__heap_base" (func $heap_base (result i32)))
  (import "env" "__data_end" (func $data_end (result i32)))

  (memory (export "memory") 17)
  (data (i32.const 64) "(source_file)\00")
  (data (i32.const 96) "parse\00")

  (func $init
    (i32.store (i32.const 20) (call $heap_base))
    (i32.store (i32.const 28) (call $data_end)))
  (start $init)

  (func $malloc (export "malloc") (param $size i32) (result i32)
    (local $ptr i32) (local $end i32)
    (local.set $ptr
      (i32.and (i32.add (i32.load (i32.const 20)) (i32.const 7)) (i32.const -8)))
    (local.set $end (i32.add (local.get $ptr) (local.get $size)))
    (if (i32.lt_u (local.get $end) (local.get $ptr))
      (then (return (i32.const 0))))
    (if (i32.gt_u (local.get $end) (i32.const -65536))
      (then (return (i32.const 0))))
    (if (i32.gt_u (local.get $end) (i32.shl (memory.size) (i32.const 16)))
      (then
        (drop (call $resize_heap (local.get $end)))
        (if (i32.eq
              (memory.grow
                (i32.sub
                  (i32.shr_u (i32.add (local.get $end) (i32.const 65535)) (i32.const 16))
                  (memory.size)))
              (i32.const -1))
          (then (return (i32.const 0))))))
    (i32.store (i32.const 20) (local.get $end))
    (i32.store (i32.const 16) (i32.add (i32.load (i32.const 16)) (i32.const 1)))
    (local.get $ptr))

  (func $free (export "free") (param $ptr i32)
    (if (local.get $ptr)
      (then
        (i32.store (i32.const 16) (i32.sub (i32.load (i32.const 16)) (i32.const 1))))))

  (func (export "ts_parser_new_wasm") (result i32)
    (local $p i32)
    (local.set $p (call $malloc (i32.const 8)))
    (if (local.get $p)
      (then (i32.store (local.get $p) (i32.const 0))))
    (local.get $p))

  (func (export "ts_parser_delete") (param $p i32)
    (call $free (local.get $p)))

  (func (export "ts_parser_set_language") (param $p i32) (param $lang i32) (result i32)
    (local $version i32)
    (if (i32.eqz (local.get $lang))
      (then
        (i32.store (local.get $p) (i32.const 0))
        (return (i32.const 1))))
    (local.set $version (i32.load (local.get $lang)))
    (if (i32.eq (local.get $version) (i32.const -1))
      (then
        (call $assert_fail (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0))
        (unreachable)))
    (if (i32.or
          (i32.lt_u (local.get $version) (i32.const 13))
          (i32.gt_u (local.get $version) (i32.const 15)))
      (then (return (i32.const 0))))
    (i32.store (local.get $p) (local.get $lang))
    (i32.const 1))

  (func (export "ts_parser_parse_wasm")
    (param $p i32) (param $old i32) (param $text i32) (param $len i32) (result i32)
    (local $t i32)
    (call $log (i32.const 0) (i32.const 96))
    (if (i32.eqz (i32.load (local.get $p)))
      (then (return (i32.const 0))))
    (if (i32.eq (i32.load8_u (local.get $text)) (i32.const 33))
      (then (unreachable)))
    (drop (call $progress (i32.const 0) (local.get $len)))
    (call $parse_cb (i32.const 0) (local.get $text) (i32.const 0) (i32.const 0) (local.get $len))
    (local.set $t (call $malloc (i32.const 12)))
    (if (i32.eqz (local.get $t))
      (then (return (i32.const 0))))
    (i32.store (local.get $t) (i32.load (local.get $p)))
    (i32.store offset=4 (local.get $t) (local.get $len))
    (i32.store offset=8 (local.get $t) (i32.load8_u (local.get $text)))
    (local.get $t))

  (func (export "ts_tree_delete") (param $t i32)
    (if (i32.eq (i32.load offset=8 (local.get $t)) (i32.const 126))
      (then (unreachable)))
    (call $free (local.get $t)))

  (func (export "ts_tree_root_node_wasm") (param $t i32) (param $out i32)
    (if (i32.eq (i32.load offset=8 (local.get $t)) (i32.const 35))
      (then (unreachable)))
    (i32.store (local.get $out) (local.get $t))
    (i32.store offset=4 (local.get $out) (i32.load offset=4 (local.get $t)))
    (memory.fill (i32.add (local.get $out) (i32.const 8)) (i32.const 0) (i32.const 24)))

  (func (export "ts_node_to_string_wasm") (param $n i32) (result i32)
    (local $s i32)
    (if (i32.eqz (i32.load (local.get $n)))
      (then (return (i32.const 0))))
    (local.set $s (call $malloc (i32.const 14)))
    (if (i32.eqz (local.get $s))
      (then (return (i32.const 0))))
    (memory.copy (local.get $s) (i32.const 64) (i32.const 14))
    (local.get $s)))
"#;

/// Rendering of every node produced by [`FAKE_GUEST`].
pub const ROOT_SEXP: &str = "(source_file)";

const LIVE_ALLOCATIONS: Address = Address::new(16);
const DATA_END_SEEN: Address = Address::new(28);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn fake_guest_wasm() -> Result<Vec<u8>> {
    wat::parse_str(FAKE_GUEST).context("failed to assemble fake guest")
}

pub fn wasm(text: &str) -> Result<Vec<u8>> {
    wat::parse_str(text).context("failed to assemble test module")
}

pub async fn load_guest(runtime: &Runtime) -> Result<GuestModule> {
    runtime
        .load(fake_guest_wasm()?)
        .await
        .context("failed to load fake guest")
}

pub async fn instantiate_guest() -> Result<Instance> {
    init_tracing();
    let runtime = Runtime::new().context("failed to build runtime")?;
    let module = load_guest(&runtime).await?;
    runtime
        .instantiate(&module)
        .await
        .context("failed to instantiate fake guest")
}

fn read_u32(bytes: &[u8]) -> Result<u32> {
    let raw: [u8; 4] = bytes.try_into().context("expected four bytes")?;
    Ok(u32::from_le_bytes(raw))
}

/// Allocations the guest has handed out and not yet had freed.
pub async fn live_allocations(instance: &Instance) -> Result<u32> {
    read_u32(&instance.read_bytes(LIVE_ALLOCATIONS, 4).await?)
}

pub async fn data_end_seen(instance: &Instance) -> Result<u32> {
    read_u32(&instance.read_bytes(DATA_END_SEEN, 4).await?)
}

/// Places a language object with the given ABI version on the guest heap.
pub async fn write_language(instance: &Instance, version: u32) -> Result<Address> {
    let addr = instance.allocate(4).await?;
    instance.write_bytes(addr, &version.to_le_bytes()).await?;
    Ok(addr)
}
