//! Stackline storage codec
//!
//! Free-text fields (message bodies, ticket threads, project notes, invoice
//! descriptions, signup drafts) are stored base64-encoded so they do not sit
//! in the database as readable text. This is obfuscation only: anyone with the
//! database can reverse it with `reveal`. It provides no confidentiality.

pub mod obfuscate;

pub use obfuscate::{CodecError, obfuscate, obfuscate_json, reveal, reveal_json};
