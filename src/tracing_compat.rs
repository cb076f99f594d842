//! Compatibility layer over the optional `tracing` dependency.
//!
//! With the default `tracing` feature enabled these are the real `tracing`
//! macros. Without it, every logging statement compiles to nothing, so the
//! scheduler can be embedded in hosts that bring no subscriber machinery.
//!
//! Crate code imports logging exclusively through this module:
//!
//! ```ignore
//! use crate::tracing_compat::{error, warn};
//! ```

#[cfg(feature = "tracing")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing"))]
mod noop {
    //! No-op stand-ins so call sites compile without the `tracing` feature.

    #[doc(hidden)]
    #[macro_export]
    macro_rules! __gridsched_trace {
        ($($arg:tt)*) => {};
    }

    #[doc(hidden)]
    #[macro_export]
    macro_rules! __gridsched_debug {
        ($($arg:tt)*) => {};
    }

    #[doc(hidden)]
    #[macro_export]
    macro_rules! __gridsched_info {
        ($($arg:tt)*) => {};
    }

    #[doc(hidden)]
    #[macro_export]
    macro_rules! __gridsched_warn {
        ($($arg:tt)*) => {};
    }

    #[doc(hidden)]
    #[macro_export]
    macro_rules! __gridsched_error {
        ($($arg:tt)*) => {};
    }
}

#[cfg(not(feature = "tracing"))]
pub use crate::{
    __gridsched_debug as debug, __gridsched_error as error, __gridsched_info as info,
    __gridsched_trace as trace, __gridsched_warn as warn,
};
