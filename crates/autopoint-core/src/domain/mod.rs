//! Domain entities for AutoPoint.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//!
//! # What lives here? (for beginners)
//!
//! - [`marker`] – value types: screen coordinates, mouse buttons, click kinds,
//!   and the [`marker::Marker`] entity itself.
//! - [`registry`] – the authoritative, ordered set of markers.  It enforces
//!   the "every order value is unique" rule and the runtime lock used while
//!   playback is in flight.
//!
//! Code in outer layers (overlay renderer, playback scheduler, input hooks)
//! depends on the domain, but the domain never depends on them.

pub mod marker;
pub mod registry;
