//! Cipher primitives for individual field values.

pub mod cipher;

pub use cipher::{CipherEnvelope, CipherError, KEY_LEN};
