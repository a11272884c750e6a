//! guestproc - process image construction for an AmigaOS userspace emulator
//!
//! Given a guest binary, builds the in-memory control structures the guest
//! runtime expects to find when a program starts: the call stack with its
//! return sentinels, the quoted argument line, the CLI block and the
//! Process (task) block.
//!
//! Layout:
//! - `machine`: the execution context (guest RAM, allocator, streams,
//!   path mapping, segment loader)
//! - `process`: builds and tears down one guest process image
//! - `config`: serde-backed machine and launch configuration

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod config;
pub mod machine;
pub mod process;

pub use config::{LaunchConfig, MachineConfig};
pub use machine::Context;
pub use process::{LaunchMode, Process};

/// Install the panic hook so panics show up in the browser console
#[cfg(target_arch = "wasm32")]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Console logging helper
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

#[cfg(target_arch = "wasm32")]
#[doc(hidden)]
pub fn __console_log(s: &str) {
    log(s);
}

/// Log to browser console (WASM)
#[cfg(target_arch = "wasm32")]
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        $crate::__console_log(&format!($($t)*))
    };
}

/// Log to stderr (native)
#[cfg(not(target_arch = "wasm32"))]
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        eprintln!($($t)*)
    };
}

/// Log through the context, honoring its verbosity setting
#[macro_export]
macro_rules! ctx_log {
    ($ctx:expr, $($t:tt)*) => {
        if $ctx.log_enabled() {
            $crate::console_log!($($t)*);
        }
    };
}
