//! Decryption-oracle request types and completion hooks
use frame_support::pallet_prelude::*;
use sp_core::ed25519;

use crate::Euint64;

pub type RequestId = u64;

/// Domain separator mixed into every attestation digest.
pub const ATTESTATION_DOMAIN: &[u8] = b"fhe-oracle/decryption/v1";

/// Why a decryption was requested. Routes the result to the pallet that owns the request.
#[derive(Encode, Decode, Clone, Copy, Eq, PartialEq, RuntimeDebug, MaxEncodedLen, TypeInfo)]
pub enum Purpose {
    /// A holder reveals their own ciphertexts; the result is only published as an event.
    AmountDisclosure,
    /// A confidential ledger burnt an amount and waits for it to pay out the underlying.
    Withdrawal,
    /// A presale waits for its running totals to settle.
    PresaleFinalization,
}

/// A signer's attestation over [`attestation_digest`].
#[derive(Encode, Decode, Clone, Eq, PartialEq, RuntimeDebug, MaxEncodedLen, TypeInfo)]
pub struct Attestation {
    pub signer: ed25519::Public,
    pub signature: ed25519::Signature,
}

/// Digest the oracle signers sign over: the request id, the handles in submission order and
/// their plaintexts in the same order.
pub fn attestation_digest(id: RequestId, handles: &[Euint64], plaintexts: &[u64]) -> [u8; 32] {
    (ATTESTATION_DOMAIN, id, handles, plaintexts).using_encoded(sp_io::hashing::blake2_256)
}

/// Submits ciphertexts for out-of-band decryption. Fire-and-forget: the plaintexts arrive
/// later through [`OnDecryption`].
pub trait DecryptionOracle<AccountId> {
    fn request_decryption(
        requester: &AccountId,
        handles: &[Euint64],
        purpose: Purpose,
    ) -> Result<RequestId, DispatchError>;
}

/// Hook invoked once an attested result has been accepted.
/// Implementors ignore purposes they do not own.
pub trait OnDecryption<AccountId> {
    fn on_decrypted(
        id: RequestId,
        requester: &AccountId,
        purpose: Purpose,
        plaintexts: &[u64],
    ) -> DispatchResult;
}

impl<AccountId> OnDecryption<AccountId> for () {
    fn on_decrypted(_: RequestId, _: &AccountId, _: Purpose, _: &[u64]) -> DispatchResult {
        Ok(())
    }
}

impl<AccountId, A, B> OnDecryption<AccountId> for (A, B)
where
    A: OnDecryption<AccountId>,
    B: OnDecryption<AccountId>,
{
    fn on_decrypted(
        id: RequestId,
        requester: &AccountId,
        purpose: Purpose,
        plaintexts: &[u64],
    ) -> DispatchResult {
        A::on_decrypted(id, requester, purpose, plaintexts)?;
        B::on_decrypted(id, requester, purpose, plaintexts)
    }
}
