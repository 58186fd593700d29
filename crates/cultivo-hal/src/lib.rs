//! `cultivo-hal` – the hardware description of the rack.
//!
//! Describes *what* the rack exposes without caring how it is reached.
//!
//! # Modules
//!
//! - [`registry`] – [`TopicRegistry`]: the immutable table of every channel,
//!   its wire topic, direction and value kind, with forward (name) and
//!   reverse (wire topic) lookup.
//! - [`codec`] – payload text codec: decoding inbound payloads, parsing and
//!   validating operator values, encoding outbound commands.
//! - [`rack`] – the default `rack0` channel table.

pub mod codec;
pub mod rack;
pub mod registry;

pub use codec::CodecError;
pub use registry::{RegistryBuilder, TopicRegistry};
