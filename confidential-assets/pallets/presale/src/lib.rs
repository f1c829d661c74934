//! Confidential Presale Pallet
//!
//! Each presale sells a fixed amount of a sale token for a wrapped base asset. Contributions,
//! allocations and running totals are encrypted; caps are enforced with encrypted comparisons so
//! nothing about individual purchases is revealed on chain.
//!
//! Lifecycle of a presale:
//! - `Active`: purchases accepted inside `[start, end]`.
//! - `PendingFinalization`: the window closed and the running totals were sent to the decryption
//!   oracle. Only one finalization request is outstanding per presale.
//! - `Cancelled` (raised below soft cap) or `Finalized`, decided inside the oracle callback.
//!
//! Every presale is an independent instance with its own sub-account, which holds the pre-funded
//! sale tokens and the contributions.
#![cfg_attr(not(feature = "std"), no_std)]

pub use pallet::*;

#[cfg(test)]
mod mock;

const LOG_TARGET: &str = "runtime::presale";

#[frame_support::pallet]
pub mod pallet {
    use fhe_primitives::{
        AclProvider, ConfidentialLedger, DecryptionOracle, Euint64, ExternalEuint64, FheOps,
        InputProof, OnDecryption, Purpose, RequestId,
    };
    use frame_support::{
        pallet_prelude::*,
        traits::{fungibles, fungibles::Mutate, tokens::Preservation, UnixTime},
        PalletId,
    };
    use frame_system::pallet_prelude::*;
    use sp_runtime::traits::AccountIdConversion;

    use super::LOG_TARGET;

    pub type PresaleId = u32;

    #[pallet::config]
    pub trait Config: frame_system::Config {
        type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;

        type AssetId: Parameter + Member + Copy + MaxEncodedLen;

        /// Operations exposed by the FHE coprocessor injected by the Runtime
        type Fhe: FheOps;

        type Acl: AclProvider<Self::AccountId>;

        /// Confidential ledger holding both the base asset and the sale token.
        type Ledger: ConfidentialLedger<Self::AccountId, AssetId = Self::AssetId>;

        type Oracle: DecryptionOracle<Self::AccountId>;

        /// Underlying sale tokens, moved in the clear at creation and settlement.
        type Fungibles: fungibles::Mutate<Self::AccountId, AssetId = Self::AssetId, Balance = u128>;

        /// Purchase windows are in seconds.
        type UnixTime: UnixTime;

        /// Root of the per-presale sub-accounts.
        #[pallet::constant]
        type PalletId: Get<PalletId>;

        type WeightInfo: WeightData;
    }

    pub trait WeightData {
        fn create_presale() -> Weight;
        fn purchase() -> Weight;
        fn request_finalization() -> Weight;
        fn claim_tokens() -> Weight;
        fn refund() -> Weight;
    }
    impl WeightData for () {
        fn create_presale() -> Weight {
            Weight::from_parts(30_000, 0)
        }
        fn purchase() -> Weight {
            Weight::from_parts(60_000, 0)
        }
        fn request_finalization() -> Weight {
            Weight::from_parts(20_000, 0)
        }
        fn claim_tokens() -> Weight {
            Weight::from_parts(20_000, 0)
        }
        fn refund() -> Weight {
            Weight::from_parts(20_000, 0)
        }
    }

    /// Fixed economics of a presale. Caps and contribution limits are in confidential base-asset
    /// units, `token_presale` in underlying sale-token units.
    #[derive(Encode, Decode, Clone, Eq, PartialEq, RuntimeDebug, TypeInfo, MaxEncodedLen)]
    pub struct PresaleOptions {
        pub token_presale: u128,
        pub hard_cap: u64,
        pub soft_cap: u64,
        pub max_contribution: u64,
        pub min_contribution: u64,
        /// Unix seconds, inclusive.
        pub start: u64,
        pub end: u64,
    }

    #[derive(
        Encode, Decode, Clone, Copy, Default, Eq, PartialEq, RuntimeDebug, TypeInfo, MaxEncodedLen,
    )]
    pub enum PresaleState {
        #[default]
        Uninitialized,
        Active,
        PendingFinalization,
        Cancelled,
        Finalized,
    }

    #[derive(Encode, Decode, Clone, Eq, PartialEq, RuntimeDebug, TypeInfo, MaxEncodedLen)]
    pub struct PresaleInfo<AccountId, AssetId> {
        pub creator: AccountId,
        pub base_asset: AssetId,
        pub sale_asset: AssetId,
        pub options: PresaleOptions,
        /// Confidential sale-token units per confidential base unit.
        pub token_per_eth: u64,
        /// Underlying sale-token units per confidential sale-token unit.
        pub sale_rate: u128,
        pub state: PresaleState,
        pub eth_raised_encrypted: Euint64,
        pub tokens_sold_encrypted: Euint64,
        /// Settled totals, set when finalized.
        pub wei_raised: u64,
        pub tokens_sold: u64,
        pub finalization_request: Option<RequestId>,
    }

    pub type PresaleInfoOf<T> =
        PresaleInfo<<T as frame_system::Config>::AccountId, <T as Config>::AssetId>;

    #[pallet::pallet]
    pub struct Pallet<T>(_);

    #[pallet::storage]
    pub type NextPresaleId<T> = StorageValue<_, PresaleId, ValueQuery>;

    #[pallet::storage]
    pub type Presales<T: Config> =
        StorageMap<_, Blake2_128Concat, PresaleId, PresaleInfoOf<T>, OptionQuery>;

    /// (Presale, Beneficiary) => encrypted base units contributed
    #[pallet::storage]
    pub type Contributions<T: Config> = StorageDoubleMap<
        _,
        Blake2_128Concat,
        PresaleId,
        Blake2_128Concat,
        T::AccountId,
        Euint64,
        OptionQuery,
    >;

    /// (Presale, Beneficiary) => encrypted sale units owed
    #[pallet::storage]
    pub type ClaimableTokens<T: Config> = StorageDoubleMap<
        _,
        Blake2_128Concat,
        PresaleId,
        Blake2_128Concat,
        T::AccountId,
        Euint64,
        OptionQuery,
    >;

    #[pallet::storage]
    pub type Claimed<T: Config> = StorageDoubleMap<
        _,
        Blake2_128Concat,
        PresaleId,
        Blake2_128Concat,
        T::AccountId,
        bool,
        ValueQuery,
    >;

    #[pallet::storage]
    pub type Refunded<T: Config> = StorageDoubleMap<
        _,
        Blake2_128Concat,
        PresaleId,
        Blake2_128Concat,
        T::AccountId,
        bool,
        ValueQuery,
    >;

    /// Outstanding finalization requests, oracle request => presale.
    #[pallet::storage]
    pub type FinalizationRequests<T> =
        StorageMap<_, Blake2_128Concat, RequestId, PresaleId, OptionQuery>;

    #[pallet::event]
    #[pallet::generate_deposit(pub(super) fn deposit_event)]
    pub enum Event<T: Config> {
        PresaleCreated {
            id: PresaleId,
            creator: T::AccountId,
            account: T::AccountId,
            token_per_eth: u64,
        },
        Purchased {
            id: PresaleId,
            contributor: T::AccountId,
            beneficiary: T::AccountId,
        },
        FinalizationRequested {
            id: PresaleId,
            request: RequestId,
        },
        Cancelled {
            id: PresaleId,
            wei_raised: u64,
        },
        Finalized {
            id: PresaleId,
            wei_raised: u64,
            tokens_sold: u64,
            withdrawal: Option<RequestId>,
        },
        TokensClaimed {
            id: PresaleId,
            beneficiary: T::AccountId,
        },
        Refunded {
            id: PresaleId,
            beneficiary: T::AccountId,
        },
    }

    #[pallet::error]
    pub enum Error<T> {
        UnknownPresale,
        UnknownAsset,
        InvalidState,
        NotInPurchasePeriod,
        PresaleNotEnded,
        /// A finalization request for this presale is still outstanding.
        FinalizationPending,
        AlreadyClaimed,
        AlreadyRefunded,
        NothingToClaim,
        NothingToRefund,
        /// No outstanding finalization for the oracle request.
        UnknownGatewayRequest,
        ResultLengthMismatch,
        InvalidInputProof,
        ZeroHardCap,
        SoftCapAboveHardCap,
        InvalidWindow,
        MinAboveMax,
        /// Sale supply cannot cover one token per base unit up to the hard cap.
        RateTooLow,
        ConversionOverflow,
        PresaleIdOverflow,
    }

    #[pallet::call]
    impl<T: Config> Pallet<T> {
        /// Opens a presale and moves `options.token_presale` sale tokens from the creator into
        /// the presale account.
        #[pallet::call_index(0)]
        #[pallet::weight(T::WeightInfo::create_presale())]
        pub fn create_presale(
            origin: OriginFor<T>,
            base_asset: T::AssetId,
            sale_asset: T::AssetId,
            options: PresaleOptions,
        ) -> DispatchResult {
            let creator = ensure_signed(origin)?;
            ensure!(options.hard_cap > 0, Error::<T>::ZeroHardCap);
            ensure!(options.soft_cap <= options.hard_cap, Error::<T>::SoftCapAboveHardCap);
            ensure!(options.start <= options.end, Error::<T>::InvalidWindow);
            ensure!(
                options.min_contribution <= options.max_contribution,
                Error::<T>::MinAboveMax
            );
            T::Ledger::rate(base_asset).ok_or(Error::<T>::UnknownAsset)?;
            let sale_rate = T::Ledger::rate(sale_asset).ok_or(Error::<T>::UnknownAsset)?;

            let token_per_eth = options.token_presale / sale_rate / u128::from(options.hard_cap);
            ensure!(token_per_eth > 0, Error::<T>::RateTooLow);
            let token_per_eth =
                u64::try_from(token_per_eth).map_err(|_| Error::<T>::ConversionOverflow)?;
            // the largest allocation must stay representable
            options
                .hard_cap
                .checked_mul(token_per_eth)
                .ok_or(Error::<T>::ConversionOverflow)?;

            let id = NextPresaleId::<T>::get();
            NextPresaleId::<T>::put(id.checked_add(1).ok_or(Error::<T>::PresaleIdOverflow)?);
            let account = Self::account_id(id);

            T::Fungibles::transfer(
                sale_asset,
                &creator,
                &account,
                options.token_presale,
                Preservation::Expendable,
            )?;

            let eth_raised_encrypted = T::Fhe::as_zero();
            let tokens_sold_encrypted = T::Fhe::as_zero();
            T::Acl::allow(&eth_raised_encrypted, &account);
            T::Acl::allow(&tokens_sold_encrypted, &account);

            Presales::<T>::insert(
                id,
                PresaleInfo {
                    creator: creator.clone(),
                    base_asset,
                    sale_asset,
                    options,
                    token_per_eth,
                    sale_rate,
                    state: PresaleState::Active,
                    eth_raised_encrypted,
                    tokens_sold_encrypted,
                    wei_raised: 0,
                    tokens_sold: 0,
                    finalization_request: None,
                },
            );
            Self::deposit_event(Event::PresaleCreated {
                id,
                creator,
                account,
                token_per_eth,
            });
            Ok(())
        }

        /// Contributes an encrypted amount of the base asset on behalf of `beneficiary`.
        /// The caller must have made the presale account its ledger operator. Any part above the
        /// hard cap is sent back to the caller.
        #[pallet::call_index(1)]
        #[pallet::weight(T::WeightInfo::purchase())]
        pub fn purchase(
            origin: OriginFor<T>,
            id: PresaleId,
            beneficiary: T::AccountId,
            input: ExternalEuint64,
            proof: InputProof,
        ) -> DispatchResult {
            let contributor = ensure_signed(origin)?;
            T::Acl::with_transient_scope(|| {
                Self::do_purchase(id, &contributor, &beneficiary, input, &proof)
            })?;
            Self::deposit_event(Event::Purchased {
                id,
                contributor,
                beneficiary,
            });
            Ok(())
        }

        /// Sends the running totals to the oracle once the window has closed.
        #[pallet::call_index(2)]
        #[pallet::weight(T::WeightInfo::request_finalization())]
        pub fn request_finalization(origin: OriginFor<T>, id: PresaleId) -> DispatchResult {
            ensure_signed(origin)?;
            let mut presale = Presales::<T>::get(id).ok_or(Error::<T>::UnknownPresale)?;
            match presale.state {
                PresaleState::Active => {}
                PresaleState::PendingFinalization => {
                    return Err(Error::<T>::FinalizationPending.into())
                }
                _ => return Err(Error::<T>::InvalidState.into()),
            }
            ensure!(Self::now() >= presale.options.end, Error::<T>::PresaleNotEnded);

            let request = T::Oracle::request_decryption(
                &Self::account_id(id),
                &[presale.eth_raised_encrypted, presale.tokens_sold_encrypted],
                Purpose::PresaleFinalization,
            )?;
            FinalizationRequests::<T>::insert(request, id);
            presale.state = PresaleState::PendingFinalization;
            presale.finalization_request = Some(request);
            Presales::<T>::insert(id, presale);

            log::debug!(target: LOG_TARGET, "presale {} awaiting request {}", id, request);
            Self::deposit_event(Event::FinalizationRequested { id, request });
            Ok(())
        }

        /// Sends `beneficiary` its sale tokens. Anyone may trigger it.
        #[pallet::call_index(3)]
        #[pallet::weight(T::WeightInfo::claim_tokens())]
        pub fn claim_tokens(
            origin: OriginFor<T>,
            id: PresaleId,
            beneficiary: T::AccountId,
        ) -> DispatchResult {
            ensure_signed(origin)?;
            let presale = Presales::<T>::get(id).ok_or(Error::<T>::UnknownPresale)?;
            ensure!(presale.state == PresaleState::Finalized, Error::<T>::InvalidState);
            ensure!(!Claimed::<T>::get(id, &beneficiary), Error::<T>::AlreadyClaimed);
            let amount =
                ClaimableTokens::<T>::get(id, &beneficiary).ok_or(Error::<T>::NothingToClaim)?;

            Claimed::<T>::insert(id, &beneficiary, true);
            T::Acl::with_transient_scope(|| {
                T::Acl::allow_transient(&amount, &T::Ledger::account());
                T::Ledger::transfer(presale.sale_asset, &Self::account_id(id), &beneficiary, amount)
            })?;

            Self::deposit_event(Event::TokensClaimed { id, beneficiary });
            Ok(())
        }

        /// Returns `beneficiary`'s contribution of a cancelled presale. Anyone may trigger it.
        #[pallet::call_index(4)]
        #[pallet::weight(T::WeightInfo::refund())]
        pub fn refund(
            origin: OriginFor<T>,
            id: PresaleId,
            beneficiary: T::AccountId,
        ) -> DispatchResult {
            ensure_signed(origin)?;
            let presale = Presales::<T>::get(id).ok_or(Error::<T>::UnknownPresale)?;
            ensure!(presale.state == PresaleState::Cancelled, Error::<T>::InvalidState);
            ensure!(!Refunded::<T>::get(id, &beneficiary), Error::<T>::AlreadyRefunded);
            let amount =
                Contributions::<T>::get(id, &beneficiary).ok_or(Error::<T>::NothingToRefund)?;

            Refunded::<T>::insert(id, &beneficiary, true);
            T::Acl::with_transient_scope(|| {
                T::Acl::allow_transient(&amount, &T::Ledger::account());
                T::Ledger::transfer(presale.base_asset, &Self::account_id(id), &beneficiary, amount)
            })?;

            Self::deposit_event(Event::Refunded { id, beneficiary });
            Ok(())
        }
    }

    impl<T: Config> Pallet<T> {
        /// Sub-account holding the funds of presale `id`.
        pub fn account_id(id: PresaleId) -> T::AccountId {
            T::PalletId::get().into_sub_account_truncating(id)
        }

        pub fn state_of(id: PresaleId) -> PresaleState {
            Presales::<T>::get(id).map(|p| p.state).unwrap_or_default()
        }

        fn now() -> u64 {
            T::UnixTime::now().as_secs()
        }

        fn or_zero(handle: Option<Euint64>) -> Euint64 {
            handle.unwrap_or_else(T::Fhe::as_zero)
        }

        fn do_purchase(
            id: PresaleId,
            contributor: &T::AccountId,
            beneficiary: &T::AccountId,
            input: ExternalEuint64,
            proof: &InputProof,
        ) -> DispatchResult {
            let mut presale = Presales::<T>::get(id).ok_or(Error::<T>::UnknownPresale)?;
            ensure!(presale.state == PresaleState::Active, Error::<T>::InvalidState);
            let now = Self::now();
            ensure!(
                presale.options.start <= now && now <= presale.options.end,
                Error::<T>::NotInPurchasePeriod
            );
            let amount = T::Fhe::verify_input(input, proof).ok_or(Error::<T>::InvalidInputProof)?;

            let account = Self::account_id(id);
            let ledger = T::Ledger::account();
            let zero = T::Fhe::as_zero();
            let options = &presale.options;

            // Per-user limits, evaluated on the cumulative contribution.
            let prior = Self::or_zero(Contributions::<T>::get(id, beneficiary));
            let max = T::Fhe::as_euint64(options.max_contribution);
            let headroom = T::Fhe::select(T::Fhe::ge(max, prior), T::Fhe::sub(max, prior), zero);
            let candidate = T::Fhe::select(T::Fhe::ge(amount, headroom), headroom, amount);
            let min = T::Fhe::as_euint64(options.min_contribution);
            let passes_min = T::Fhe::ge(T::Fhe::add(candidate, prior), min);
            let final_purchase = T::Fhe::select(passes_min, candidate, zero);

            T::Acl::allow_transient(&final_purchase, &ledger);
            let transferred = T::Ledger::transfer_from(
                presale.base_asset,
                &account,
                contributor,
                &account,
                final_purchase,
            )?;

            // Pool-wide hard cap, re-applied on what actually moved.
            let hard_cap = T::Fhe::as_euint64(options.hard_cap);
            let new_total = T::Fhe::add(presale.eth_raised_encrypted, transferred);
            let over_cap = T::Fhe::gt(new_total, hard_cap);
            let refund = T::Fhe::select(over_cap, T::Fhe::sub(new_total, hard_cap), zero);
            let eth_raised = T::Fhe::sub(new_total, refund);
            let net = T::Fhe::sub(transferred, refund);

            T::Acl::allow_transient(&refund, &ledger);
            T::Ledger::transfer(presale.base_asset, &account, contributor, refund)?;

            let tokens = T::Fhe::mul_plain(net, presale.token_per_eth);
            let tokens_sold = T::Fhe::add(presale.tokens_sold_encrypted, tokens);
            let contribution = T::Fhe::add(prior, net);
            let claimable = T::Fhe::add(
                Self::or_zero(ClaimableTokens::<T>::get(id, beneficiary)),
                tokens,
            );

            T::Acl::allow(&eth_raised, &account);
            T::Acl::allow(&tokens_sold, &account);
            for handle in [&contribution, &claimable] {
                T::Acl::allow(handle, &account);
                T::Acl::allow(handle, beneficiary);
            }

            Contributions::<T>::insert(id, beneficiary, contribution);
            ClaimableTokens::<T>::insert(id, beneficiary, claimable);
            presale.eth_raised_encrypted = eth_raised;
            presale.tokens_sold_encrypted = tokens_sold;
            Presales::<T>::insert(id, presale);
            Ok(())
        }

        fn complete_finalization(request: RequestId, plaintexts: &[u64]) -> DispatchResult {
            let id =
                FinalizationRequests::<T>::take(request).ok_or(Error::<T>::UnknownGatewayRequest)?;
            let [eth_raised, tokens_sold] = plaintexts else {
                return Err(Error::<T>::ResultLengthMismatch.into());
            };
            Self::settle(id, *eth_raised, *tokens_sold)
        }

        /// Commits a presale to its terminal state from the decrypted totals.
        fn settle(id: PresaleId, eth_raised: u64, tokens_sold: u64) -> DispatchResult {
            let mut presale = Presales::<T>::get(id).ok_or(Error::<T>::UnknownPresale)?;
            ensure!(
                presale.state == PresaleState::PendingFinalization,
                Error::<T>::InvalidState
            );
            presale.finalization_request = None;
            presale.wei_raised = eth_raised;
            presale.tokens_sold = tokens_sold;
            let account = Self::account_id(id);
            let token_presale = presale.options.token_presale;

            if eth_raised < presale.options.soft_cap {
                presale.state = PresaleState::Cancelled;
                T::Fungibles::transfer(
                    presale.sale_asset,
                    &account,
                    &presale.creator,
                    token_presale,
                    Preservation::Expendable,
                )?;
                log::debug!(target: LOG_TARGET, "presale {} cancelled at {}", id, eth_raised);
                Self::deposit_event(Event::Cancelled {
                    id,
                    wei_raised: eth_raised,
                });
                Presales::<T>::insert(id, presale);
                return Ok(());
            }

            presale.state = PresaleState::Finalized;

            let sold = u128::from(tokens_sold)
                .checked_mul(presale.sale_rate)
                .ok_or(Error::<T>::ConversionOverflow)?;
            let unsold = token_presale.saturating_sub(sold);
            if unsold > 0 {
                T::Fungibles::transfer(
                    presale.sale_asset,
                    &account,
                    &presale.creator,
                    unsold,
                    Preservation::Expendable,
                )?;
            }
            if sold > 0 {
                T::Ledger::wrap(presale.sale_asset, &account, &account, sold)?;
            }

            let withdrawal = if eth_raised > 0 {
                T::Acl::allow_transient(&presale.eth_raised_encrypted, &T::Ledger::account());
                Some(T::Ledger::withdraw(
                    presale.base_asset,
                    &account,
                    &account,
                    &presale.creator,
                    presale.eth_raised_encrypted,
                )?)
            } else {
                None
            };

            log::debug!(
                target: LOG_TARGET,
                "presale {} finalized: raised {}, sold {}",
                id,
                eth_raised,
                tokens_sold
            );
            Self::deposit_event(Event::Finalized {
                id,
                wei_raised: eth_raised,
                tokens_sold,
                withdrawal,
            });
            Presales::<T>::insert(id, presale);
            Ok(())
        }
    }

    impl<T: Config> OnDecryption<T::AccountId> for Pallet<T> {
        fn on_decrypted(
            id: RequestId,
            _requester: &T::AccountId,
            purpose: Purpose,
            plaintexts: &[u64],
        ) -> DispatchResult {
            match purpose {
                Purpose::PresaleFinalization => Self::complete_finalization(id, plaintexts),
                _ => Ok(()),
            }
        }
    }
}
