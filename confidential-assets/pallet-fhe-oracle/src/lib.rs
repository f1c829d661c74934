//! FHE Oracle Pallet for requesting and fulfilling attested decryptions
//!
//! Pallets (through [`DecryptionOracle`]) and holders (through `request_disclosure`) submit
//! ciphertext handles. An off-chain key holder decrypts them and a relayer posts the
//! plaintexts with signatures from the registered signer set. Once the attestation checks out
//! the request is deleted and the result is handed to [`Config::OnDecryption`].
//!
//! A rejected `fulfill` leaves the request in place so a correctly signed retry can land.
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub use pallet::*;

#[cfg(test)]
mod mock;

const LOG_TARGET: &str = "runtime::fhe-oracle";

#[frame_support::pallet]
pub mod pallet {
    use alloc::vec::Vec;

    use fhe_primitives::{
        attestation_digest, AclProvider, Attestation, DecryptionOracle, Euint64, OnDecryption,
        Purpose, RequestId,
    };
    use frame_support::{pallet_prelude::*, traits::EnsureOrigin, BoundedVec};
    use frame_system::pallet_prelude::*;
    use sp_core::ed25519;

    use super::LOG_TARGET;

    #[pallet::config]
    pub trait Config: frame_system::Config {
        type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;
        /// Origin allowed to relay results.
        type FulfillOrigin: EnsureOrigin<Self::RuntimeOrigin>;
        /// Grants a requester must hold on every submitted handle.
        type Acl: AclProvider<Self::AccountId>;
        /// Business logic continues here once a result is accepted.
        type OnDecryption: OnDecryption<Self::AccountId>;
        /// Max handles per request.
        #[pallet::constant]
        type MaxHandles: Get<u32>;
        /// Max registered signers.
        #[pallet::constant]
        type MaxSigners: Get<u32>;
        type WeightInfo: WeightData;
    }

    pub trait WeightData {
        fn request() -> Weight;
        fn fulfill() -> Weight;
        fn set_signers() -> Weight;
    }
    impl WeightData for () {
        fn request() -> Weight {
            Weight::from_parts(10_000, 0)
        }

        fn fulfill() -> Weight {
            Weight::from_parts(40_000, 0)
        }

        fn set_signers() -> Weight {
            Weight::from_parts(10_000, 0)
        }
    }

    #[derive(Encode, Decode, Clone, Eq, PartialEq, RuntimeDebug, TypeInfo, MaxEncodedLen)]
    pub struct Request<AccountId, B> {
        pub requester: AccountId,
        pub purpose: Purpose,
        pub handles: B,
    }

    pub type RequestOf<T> = Request<
        <T as frame_system::Config>::AccountId,
        BoundedVec<Euint64, <T as Config>::MaxHandles>,
    >;

    #[pallet::pallet]
    pub struct Pallet<T>(_);

    #[pallet::storage]
    pub type NextRequestId<T> = StorageValue<_, RequestId, ValueQuery>;

    /// Live requests. An entry is removed exactly once, when its result is accepted.
    #[pallet::storage]
    pub type Requests<T: Config> =
        StorageMap<_, Blake2_128Concat, RequestId, RequestOf<T>, OptionQuery>;

    #[pallet::storage]
    pub type Signers<T: Config> =
        StorageValue<_, BoundedVec<ed25519::Public, T::MaxSigners>, ValueQuery>;

    /// Distinct valid signatures needed to accept a result.
    #[pallet::storage]
    pub type Threshold<T> = StorageValue<_, u32, ValueQuery>;

    #[pallet::event]
    #[pallet::generate_deposit(pub(super) fn deposit_event)]
    pub enum Event<T: Config> {
        Requested {
            id: RequestId,
            who: T::AccountId,
            purpose: Purpose,
            handles: u32,
        },
        Fulfilled {
            id: RequestId,
        },
        /// Plaintexts of an `AmountDisclosure` request, visible to anyone.
        Disclosed {
            id: RequestId,
            who: T::AccountId,
            plaintexts: BoundedVec<u64, T::MaxHandles>,
        },
        SignersSet {
            count: u32,
            threshold: u32,
        },
    }

    #[pallet::error]
    pub enum Error<T> {
        UnknownRequest,
        NoHandles,
        TooManyHandles,
        /// Requester holds no grant on one of the handles.
        UnauthorizedCiphertextUse,
        /// Not enough distinct registered signers signed the result.
        InvalidAttestation,
        /// Plaintext count differs from the submitted handle count.
        ResultLengthMismatch,
        InvalidThreshold,
        RequestIdOverflow,
    }

    #[pallet::call]
    impl<T: Config> Pallet<T> {
        /// A holder asks to reveal ciphertexts it is allowed on (e.g. its own balance).
        ///
        /// Disclosure is public: the plaintexts are published in [`Event::Disclosed`] and are
        /// readable by every chain observer, not only the requester.
        #[pallet::call_index(0)]
        #[pallet::weight(T::WeightInfo::request())]
        pub fn request_disclosure(
            origin: OriginFor<T>,
            handles: BoundedVec<Euint64, T::MaxHandles>,
        ) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_request(who, handles, Purpose::AmountDisclosure).map(|_| ())
        }

        /// Relayer posts the plaintexts for `id`, in submission order, with signer attestations.
        #[pallet::call_index(1)]
        #[pallet::weight(T::WeightInfo::fulfill())]
        pub fn fulfill(
            origin: OriginFor<T>,
            id: RequestId,
            plaintexts: BoundedVec<u64, T::MaxHandles>,
            attestations: BoundedVec<Attestation, T::MaxSigners>,
        ) -> DispatchResult {
            T::FulfillOrigin::ensure_origin(origin)?;
            let request = Requests::<T>::get(id).ok_or(Error::<T>::UnknownRequest)?;
            ensure!(
                plaintexts.len() == request.handles.len(),
                Error::<T>::ResultLengthMismatch
            );
            if !Self::verify_attestations(id, &request.handles, &plaintexts, &attestations) {
                log::warn!(target: LOG_TARGET, "rejected attestation for request {}", id);
                return Err(Error::<T>::InvalidAttestation.into());
            }

            Requests::<T>::remove(id);
            T::Acl::with_transient_scope(|| {
                T::OnDecryption::on_decrypted(id, &request.requester, request.purpose, &plaintexts)
            })?;

            if request.purpose == Purpose::AmountDisclosure {
                Self::deposit_event(Event::Disclosed {
                    id,
                    who: request.requester,
                    plaintexts,
                });
            }
            Self::deposit_event(Event::Fulfilled { id });
            Ok(())
        }

        /// Root replaces the signer set and the number of signatures a result needs.
        #[pallet::call_index(2)]
        #[pallet::weight(T::WeightInfo::set_signers())]
        pub fn set_signers(
            origin: OriginFor<T>,
            signers: BoundedVec<ed25519::Public, T::MaxSigners>,
            threshold: u32,
        ) -> DispatchResult {
            ensure_root(origin)?;
            ensure!(
                threshold > 0 && threshold as usize <= signers.len(),
                Error::<T>::InvalidThreshold
            );
            let count = signers.len() as u32;
            Signers::<T>::put(signers);
            Threshold::<T>::put(threshold);
            Self::deposit_event(Event::SignersSet { count, threshold });
            Ok(())
        }
    }

    impl<T: Config> Pallet<T> {
        pub fn get_request(id: RequestId) -> Option<RequestOf<T>> {
            Requests::<T>::get(id)
        }

        fn do_request(
            who: T::AccountId,
            handles: BoundedVec<Euint64, T::MaxHandles>,
            purpose: Purpose,
        ) -> Result<RequestId, DispatchError> {
            ensure!(!handles.is_empty(), Error::<T>::NoHandles);
            ensure!(
                handles.iter().all(|h| T::Acl::is_allowed(h, &who)),
                Error::<T>::UnauthorizedCiphertextUse
            );

            let id = NextRequestId::<T>::get();
            NextRequestId::<T>::put(id.checked_add(1).ok_or(Error::<T>::RequestIdOverflow)?);

            let count = handles.len() as u32;
            Requests::<T>::insert(
                id,
                Request {
                    requester: who.clone(),
                    purpose,
                    handles,
                },
            );
            log::debug!(target: LOG_TARGET, "request {} for {:?} ({} handles)", id, purpose, count);
            Self::deposit_event(Event::Requested {
                id,
                who,
                purpose,
                handles: count,
            });
            Ok(id)
        }

        fn verify_attestations(
            id: RequestId,
            handles: &[Euint64],
            plaintexts: &[u64],
            attestations: &[Attestation],
        ) -> bool {
            let threshold = Threshold::<T>::get();
            if threshold == 0 {
                return false;
            }
            let signers = Signers::<T>::get();
            let digest = attestation_digest(id, handles, plaintexts);

            let mut valid: Vec<ed25519::Public> = Vec::new();
            for attestation in attestations {
                if !signers.contains(&attestation.signer) || valid.contains(&attestation.signer) {
                    continue;
                }
                if sp_io::crypto::ed25519_verify(
                    &attestation.signature,
                    &digest,
                    &attestation.signer,
                ) {
                    valid.push(attestation.signer.clone());
                }
            }
            valid.len() as u32 >= threshold
        }
    }

    impl<T: Config> DecryptionOracle<T::AccountId> for Pallet<T> {
        fn request_decryption(
            requester: &T::AccountId,
            handles: &[Euint64],
            purpose: Purpose,
        ) -> Result<RequestId, DispatchError> {
            let handles: BoundedVec<Euint64, T::MaxHandles> =
                handles.to_vec().try_into().map_err(|_| Error::<T>::TooManyHandles)?;
            Self::do_request(requester.clone(), handles, purpose)
        }
    }
}
