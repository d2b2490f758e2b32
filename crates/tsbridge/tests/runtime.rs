mod common;

use anyhow::{Context, Result};
use tsbridge::{Error, HeapLayout, ImportKind, ImportShim, Runtime};

use self::common::{
    ROOT_SEXP, data_end_seen, fake_guest_wasm, init_tracing, load_guest, wasm, write_language,
};

const EXPORTS_ONLY_MEMORY: &str = r#"(module (memory (export "memory") 1))"#;

#[tokio::test]
async fn invalid_image_is_a_compile_error() -> Result<()> {
    let runtime = Runtime::new()?;
    let err = runtime
        .load(b"not wasm".to_vec())
        .await
        .expect_err("garbage image");
    assert!(matches!(err, Error::Compile(_)), "got {err:?}");
    assert!(err.is_fatal());
    Ok(())
}

#[test]
fn rejected_engine_config_is_an_engine_error() {
    // Async support is forced on, and wasmtime refuses a wasm stack larger
    // than the async fiber stack.
    let mut cfg = wasmtime::Config::new();
    cfg.async_stack_size(256 * 1024);
    cfg.max_wasm_stack(1024 * 1024);

    let err = Runtime::builder()
        .engine_config(cfg)
        .build()
        .err()
        .expect("invalid stack configuration");
    assert!(matches!(err, Error::Engine(_)), "got {err:?}");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn imports_report_their_kind() -> Result<()> {
    let runtime = Runtime::new()?;
    let module = runtime
        .load(wasm(
            r#"(module
                (import "env" "abort" (func))
                (import "env" "table" (table 1 funcref))
                (import "env" "sp" (global i32))
                (memory (export "memory") 1))"#,
        )?)
        .await?;

    let kinds: Vec<_> = module.imports().iter().map(|i| i.kind).collect();
    assert_eq!(
        kinds,
        [ImportKind::Func, ImportKind::Table, ImportKind::Global]
    );
    Ok(())
}

#[tokio::test]
async fn module_without_memory_export_is_rejected() -> Result<()> {
    let runtime = Runtime::new()?;
    let err = runtime
        .load(wasm("(module (memory 1))")?)
        .await
        .expect_err("memory is not exported");
    assert!(
        matches!(&err, Error::MissingMemoryExport { name } if name == "memory"),
        "got {err:?}"
    );

    let renamed = Runtime::builder().memory_export("heap").build()?;
    let err = load_guest(&renamed).await.expect_err("guest exports `memory`");
    assert!(
        format!("{err:#}").contains("`heap`"),
        "unexpected error: {err:#}"
    );
    Ok(())
}

#[tokio::test]
async fn unresolved_imports_are_listed() -> Result<()> {
    let runtime = Runtime::new()?;
    let module = runtime
        .load(wasm(
            r#"(module
                (import "env" "abort" (func))
                (import "wasi_snapshot_preview1" "fd_write"
                    (func (param i32 i32 i32 i32) (result i32)))
                (memory (export "memory") 1))"#,
        )?)
        .await?;

    let err = runtime
        .instantiate(&module)
        .await
        .expect_err("WASI is not provided");
    assert!(matches!(err, Error::Instantiation(_)), "got {err:?}");
    assert!(
        err.to_string().contains("wasi_snapshot_preview1::fd_write"),
        "unexpected error: {err}"
    );
    assert!(!err.to_string().contains("env::abort"));
    Ok(())
}

#[tokio::test]
async fn mistyped_import_fails_instantiation() -> Result<()> {
    let runtime = Runtime::new()?;
    let module = runtime
        .load(wasm(
            r#"(module
                (import "env" "abort" (func (param i32)))
                (memory (export "memory") 1))"#,
        )?)
        .await?;

    let err = runtime
        .instantiate(&module)
        .await
        .expect_err("signature mismatch");
    assert!(matches!(err, Error::Instantiation(_)), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn missing_guest_export_fails_instantiation() -> Result<()> {
    let runtime = Runtime::new()?;
    let module = runtime.load(wasm(EXPORTS_ONLY_MEMORY)?).await?;

    let err = runtime
        .instantiate(&module)
        .await
        .expect_err("no tree-sitter exports");
    assert!(matches!(err, Error::Instantiation(_)), "got {err:?}");
    assert!(format!("{err:#}").contains("ts_parser_new_wasm"));
    Ok(())
}

#[tokio::test]
async fn trap_during_start_fails_instantiation() -> Result<()> {
    let runtime = Runtime::new()?;
    let module = runtime
        .load(wasm(
            r#"(module
                (memory (export "memory") 1)
                (func $boom unreachable)
                (start $boom))"#,
        )?)
        .await?;

    let err = runtime
        .instantiate(&module)
        .await
        .expect_err("start traps");
    assert!(matches!(err, Error::Instantiation(_)), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn module_introspection() -> Result<()> {
    let runtime = Runtime::new()?;
    let module = load_guest(&runtime).await?;

    let functions = module.exported_functions();
    let malloc = functions
        .iter()
        .find(|f| f.name == "malloc")
        .context("malloc is exported")?;
    assert_eq!(malloc.params, ["i32"]);
    assert_eq!(malloc.results, ["i32"]);
    assert!(functions.iter().any(|f| f.name == "ts_tree_root_node_wasm"));

    let memories = module.exported_memories();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].name, "memory");
    assert_eq!(memories[0].minimum_pages, 17);
    assert_eq!(memories[0].maximum_pages, None);
    assert!(!memories[0].is_64);

    let imports = module.imports();
    assert_eq!(imports.len(), 9);
    assert!(imports.iter().all(|i| i.module == "env" && i.kind == ImportKind::Func));

    let table = runtime.import_table();
    assert!(
        imports
            .iter()
            .all(|i| table.get(&i.module, &i.name).is_some())
    );

    let instance = runtime.instantiate(&module).await?;
    assert_eq!(instance.exported_functions(), functions);
    assert_eq!(instance.exported_memories(), memories);
    Ok(())
}

#[tokio::test]
async fn heap_layout_is_reported_to_guest() -> Result<()> {
    init_tracing();
    let layout = HeapLayout {
        heap_base: HeapLayout::DEFAULT_ADDRESS + 4096,
        data_end: HeapLayout::DEFAULT_ADDRESS + 1024,
    };
    let runtime = Runtime::builder().heap_layout(layout).build()?;
    let module = load_guest(&runtime).await?;
    let instance = runtime.instantiate(&module).await?;

    assert_eq!(data_end_seen(&instance).await?, layout.data_end);
    let addr = instance.allocate(8).await?;
    assert_eq!(addr.get(), layout.heap_base);
    instance.release(addr).await?;
    Ok(())
}

#[tokio::test]
async fn custom_import_table_overrides_standard_shim() -> Result<()> {
    let runtime = Runtime::new()?;
    let module = load_guest(&runtime).await?;
    let imports = runtime
        .import_table()
        .with("env", "__data_end", ImportShim::Constant(4242));

    let instance = runtime.instantiate_with(&module, &imports).await?;
    assert_eq!(data_end_seen(&instance).await?, 4242);
    Ok(())
}

#[tokio::test]
async fn memory_cap_limits_guest_allocations() -> Result<()> {
    let runtime = Runtime::builder().max_memory(2 * 1024 * 1024).build()?;
    let module = load_guest(&runtime).await?;
    let instance = runtime.instantiate(&module).await?;

    let err = instance
        .allocate(2 * 1024 * 1024)
        .await
        .expect_err("exceeds the 2 MiB cap");
    assert!(matches!(err, Error::AllocationFailed { .. }), "got {err:?}");
    assert!(instance.memory_size().await? <= 2 * 1024 * 1024);
    Ok(())
}

#[tokio::test]
async fn instances_of_one_module_are_isolated() -> Result<()> {
    let runtime = Runtime::new()?;
    let module = load_guest(&runtime).await?;
    let first = runtime.instantiate(&module).await?;
    let second = runtime.instantiate(&module).await?;
    assert_ne!(first.id(), second.id());

    let addr = first.write_string("only in first").await?;
    assert_eq!(second.read_c_string(addr).await?, "");
    Ok(())
}

#[tokio::test]
async fn compiled_module_is_cached_on_disk() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir().context("failed to create cache dir")?;
    let cache = dir.path().join("modules");

    let runtime = Runtime::builder().cache_path(&cache).build()?;
    load_guest(&runtime).await?;
    let entries = std::fs::read_dir(&cache)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].extension().is_some_and(|ext| ext == "cwasm"));

    // A second runtime with the same settings reuses the artifact.
    let runtime = Runtime::builder().cache_path(&cache).build()?;
    let module = load_guest(&runtime).await?;
    assert_eq!(std::fs::read_dir(&cache)?.count(), 1);

    let instance = runtime.instantiate(&module).await?;
    let language = write_language(&instance, 14).await?;
    let parser = instance.new_parser().await?;
    parser.set_language(language).await?;
    let tree = parser.parse_string("cached").await?;
    let node = tree.root_node().await?;
    assert_eq!(node.to_sexp().await?, ROOT_SEXP);
    Ok(())
}

#[tokio::test]
async fn load_file_reads_module_from_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("guest.wasm");
    std::fs::write(&path, fake_guest_wasm()?)?;

    let runtime = Runtime::new()?;
    let module = runtime.load_file(&path).await?;
    assert_eq!(module.imports().len(), 9);

    let err = runtime
        .load_file(dir.path().join("missing.wasm"))
        .await
        .expect_err("file does not exist");
    assert!(matches!(err, Error::Io(_)), "got {err:?}");
    Ok(())
}
