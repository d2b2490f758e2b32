use wasmtime::Config;

/// Forces the engine settings the bridge relies on.
pub fn configure_engine(cfg: &mut Config) {
    cfg.async_support(true);
    cfg.wasm_backtrace(true);
    cfg.generate_address_map(false);
    cfg.native_unwind_info(false);
    cfg.cranelift_opt_level(wasmtime::OptLevel::Speed);
}
