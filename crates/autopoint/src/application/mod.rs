//! Application layer use cases for AutoPoint.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure business rules in `autopoint-core`) and the infrastructure (hooks,
//! graphics, SendInput).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** domain objects to fulfil a user goal (e.g., "replay a
//!   click at every marker, in order, until told to stop").
//! - **Depend on abstractions** (traits) rather than concrete implementations,
//!   so the infrastructure can be swapped without changing this code.
//! - **Contain no OS calls**.
//!
//! # Sub-modules
//!
//! - **`playback`** – The background replay of the registry's markers, with
//!   looping and cooperative stop.
//!
//! - **`modes`** – Normal / Add / Remove / Running interaction modes.  Turns
//!   raw hook callbacks into commands for the UI thread and applies them.
//!
//! - **`hotkey`** – Parsing of the playback toggle chord and tracking of the
//!   keys currently held.
//!
//! - **`console`** – The line commands accepted on the terminal (`add`,
//!   `run`, `save <path>`, ...).

pub mod console;
pub mod hotkey;
pub mod modes;
pub mod playback;
