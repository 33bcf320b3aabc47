//! Resume subsystem: snapshot types, codec, durable store, and
//! compatibility validation.

pub mod codec;
pub mod compat;
pub mod snapshot;
pub mod store;
