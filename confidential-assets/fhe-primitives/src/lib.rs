//! Primitives shared by the confidential presale pallets.
//!
//! - [`ops`]: ciphertext handles and the FHE coprocessor interface.
//! - [`acl`]: capability grants over ciphertext handles.
//! - [`oracle`]: decryption requests, attestation digests and completion hooks.
//! - [`ledger`]: the confidential ledger surface consumed by other pallets.
//! - [`testing`] (`testing` feature): a clear-text coprocessor for mock runtimes.
#![cfg_attr(not(feature = "std"), no_std)]

pub mod acl;
pub mod ledger;
pub mod ops;
pub mod oracle;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use acl::*;
pub use ledger::*;
pub use ops::*;
pub use oracle::*;
