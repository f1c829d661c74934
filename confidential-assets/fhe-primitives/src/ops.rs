//! Types and traits to access the FHE coprocessor from inside a pallet

use frame_support::{pallet_prelude::*, BoundedVec};
use sp_core::H256;

/// Handle to an encrypted `u64` held by the coprocessor (analogous to `euint64`).
///
/// The handle is opaque: pallets store it, pass it to [`FheOps`] and grant access to it,
/// but never learn the plaintext behind it.
#[derive(
    Encode,
    Decode,
    Clone,
    Copy,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    RuntimeDebug,
    TypeInfo,
    MaxEncodedLen,
)]
pub struct Euint64(pub H256);

/// Handle to an encrypted boolean (analogous to `ebool`). Only produced by comparisons and
/// only consumed by [`FheOps::select`].
#[derive(Encode, Decode, Clone, Copy, Eq, PartialEq, RuntimeDebug, TypeInfo, MaxEncodedLen)]
pub struct Ebool(pub H256);

/// Fresh encrypted input submitted by a user (analogous to `externalEuint64`).
/// Becomes a usable [`Euint64`] only after [`FheOps::verify_input`] accepts its proof.
#[derive(Encode, Decode, Clone, Copy, Eq, PartialEq, RuntimeDebug, TypeInfo, MaxEncodedLen)]
pub struct ExternalEuint64(pub H256);

/// Proof of well-formedness attached to an [`ExternalEuint64`].
pub type MaxProofLen = ConstU32<1024>;
pub type InputProof = BoundedVec<u8, MaxProofLen>;

impl Euint64 {
    pub fn handle(&self) -> H256 {
        self.0
    }
}

/// Homomorphic operations over [`Euint64`]. Injected by the runtime.
///
/// Every result is a fresh handle. Implementations must not branch on plaintexts in a way
/// observable to the caller; in particular `select` evaluates both arms.
pub trait FheOps {
    fn add(a: Euint64, b: Euint64) -> Euint64;
    /// Wraps on underflow. Callers clamp with [`FheOps::select`] first.
    fn sub(a: Euint64, b: Euint64) -> Euint64;
    /// Ciphertext times a plaintext scalar.
    fn mul_plain(a: Euint64, k: u64) -> Euint64;
    fn ge(a: Euint64, b: Euint64) -> Ebool;
    fn gt(a: Euint64, b: Euint64) -> Ebool;
    /// Encrypted ternary: `cond ? a : b`.
    fn select(cond: Ebool, a: Euint64, b: Euint64) -> Euint64;
    /// Trivial encryption of a plaintext constant.
    fn as_euint64(value: u64) -> Euint64;
    /// Checks the proof attached to a user input and returns the usable handle.
    fn verify_input(input: ExternalEuint64, proof: &InputProof) -> Option<Euint64>;

    fn as_zero() -> Euint64 {
        Self::as_euint64(0)
    }

    /// `min(a, b)` without revealing which operand won.
    fn min(a: Euint64, b: Euint64) -> Euint64 {
        Self::select(Self::gt(a, b), b, a)
    }
}
