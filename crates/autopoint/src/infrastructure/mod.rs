//! Infrastructure layer for AutoPoint.
//!
//! Contains OS-facing adapters: global input hooks, synthetic pointer input,
//! the overlay surface, and file-system storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `autopoint_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod input_hooks;
pub mod overlay;
pub mod pointer_injection;
pub mod storage;
