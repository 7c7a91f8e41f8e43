//! Log backend setup.
//!
//! Library code only talks to the `log` facade. Embedders that already
//! install a logger can skip this entirely.

/// Installs the default backend for the current target.
///
/// WASM: panics go to the console and `log` records are bridged into
/// `tracing-wasm`. Native: `env_logger`, filtered by `RUST_LOG`.
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    #[cfg(target_arch = "wasm32")]
    {
        console_error_panic_hook::set_once();
        if tracing_log::LogTracer::init().is_ok() {
            let _ = tracing_wasm::try_set_as_global_default();
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        let _ = env_logger::try_init();
    }
}
