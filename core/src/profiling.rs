//! Profiling support via Tracy.
//!
//! Instrumentation for the job system, allocators and frame graph. Enable it
//! with the `profiling` Cargo feature:
//!
//! ```toml
//! [dependencies]
//! tde-core = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! Then connect the [Tracy profiler](https://github.com/wolfpld/tracy) to the
//! running application. Worker threads show up under their configured names,
//! every job and frame-graph pass opens its own zone, and allocators plot
//! their used bytes.
//!
//! ```ignore
//! use tde_core::profiling::{profile_scope, profile_function};
//!
//! fn compile_frame() {
//!     profile_function!();
//!
//!     {
//!         profile_scope!("cull_passes");
//!         // ...
//!     }
//! }
//! ```
//!
//! When profiling is disabled (the default), all macros compile to no-ops.

#[cfg(feature = "profiling")]
pub use tracy_client::{
    self, Client, Span, frame_mark as tracy_frame_mark, plot as tracy_plot, span,
};

/// Marks the end of a frame, typically right after the frame graph executed.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! frame_mark {
    () => {
        $crate::profiling::tracy_frame_mark()
    };
}

#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! frame_mark {
    () => {};
}

/// Opens a zone named by a string literal that lasts until the end of the
/// enclosing scope.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::span!($name);
    };
}

#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Opens a zone named after the enclosing function.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_function {
    () => {
        let _profile_span = $crate::profiling::span!();
    };
}

#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_function {
    () => {};
}

/// Plots a numeric value over time, e.g. allocator usage or queue depth.
///
/// ```ignore
/// profile_plot!("Pending jobs", queue.len());
/// ```
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        $crate::profiling::tracy_plot!($name, $value as f64)
    };
}

#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        let _ = $value;
    };
}

/// Names the current thread in the profiler. Accepts runtime strings so
/// worker threads can carry their index.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! set_thread_name {
    ($name:expr) => {
        if let Some(client) = $crate::profiling::Client::running() {
            client.set_thread_name($name);
        }
    };
}

#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! set_thread_name {
    ($name:expr) => {
        let _ = $name;
    };
}

/// Sends a message to the profiler's message log.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_message {
    ($msg:expr) => {
        if let Some(client) = $crate::profiling::Client::running() {
            client.message($msg, 0);
        }
    };
}

#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_message {
    ($msg:expr) => {
        let _ = $msg;
    };
}

/// Opens a zone whose name is only known at runtime, such as a job or pass
/// name. The name is heap-allocated by the profiler, so prefer
/// [`profile_scope!`] for fixed names.
///
/// ```ignore
/// profile_scope_dynamic!(pass.name());
/// ```
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope_dynamic {
    ($name:expr) => {
        let _profile_span = $crate::profiling::Client::running()
            .map(|c| c.span_alloc(Some($name), "", file!(), line!(), 0));
    };
}

#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope_dynamic {
    ($name:expr) => {
        let _ = $name;
    };
}

pub use frame_mark;
pub use profile_function;
pub use profile_message;
pub use profile_plot;
pub use profile_scope;
pub use profile_scope_dynamic;
pub use set_thread_name;

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_expand_without_profiler() {
        let worker = String::from("tde-worker-0");
        set_thread_name!(&worker);
        profile_scope!("job");
        profile_scope_dynamic!(worker.as_str());
        profile_function!();
        profile_plot!("Stack allocator used bytes", 128usize);
        profile_message!("frame graph compiled");
        frame_mark!();
    }
}
