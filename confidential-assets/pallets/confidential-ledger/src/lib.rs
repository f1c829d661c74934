//! Confidential Ledger Pallet
//!
//! Wraps fungible assets into encrypted balances at a fixed per-asset rate (underlying units per
//! confidential unit). Deposits are plaintext in and ciphertext out. Withdrawals burn an encrypted
//! amount, ask the decryption oracle for its plaintext and pay the underlying once the attested
//! result comes back through [`OnDecryption`].
//!
//! Transfers are all-or-nothing: `transferred = amount <= balance ? amount : 0`, computed with
//! encrypted comparison and select. Burns clamp to the available balance instead.
//!
//! Other pallets use the ledger through [`ConfidentialLedger`]. Handles they pass in must be lent
//! to the ledger account first.
#![cfg_attr(not(feature = "std"), no_std)]

pub use pallet::*;

#[cfg(test)]
mod mock;

const LOG_TARGET: &str = "runtime::confidential-ledger";

#[frame_support::pallet]
pub mod pallet {
    use fhe_primitives::{
        AclProvider, ConfidentialLedger, DecryptionOracle, Euint64, ExternalEuint64, FheOps,
        InputProof, OnDecryption, Purpose, RequestId,
    };
    use frame_support::{
        pallet_prelude::*,
        traits::{fungibles, fungibles::Mutate, tokens::Preservation},
        PalletId,
    };
    use frame_system::pallet_prelude::*;
    use sp_runtime::traits::AccountIdConversion;

    use super::LOG_TARGET;

    #[pallet::config]
    pub trait Config: frame_system::Config {
        type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;

        /// Identifies both the underlying fungible and its confidential wrapper.
        type AssetId: Parameter + Member + Copy + MaxEncodedLen;

        /// Underlying plaintext funds.
        type Fungibles: fungibles::Mutate<Self::AccountId, AssetId = Self::AssetId, Balance = u128>;

        /// Operations exposed by the FHE coprocessor injected by the Runtime
        type Fhe: FheOps;

        type Acl: AclProvider<Self::AccountId>;

        type Oracle: DecryptionOracle<Self::AccountId>;

        /// Custody account for wrapped funds, also the ledger's principal in the ACL.
        #[pallet::constant]
        type PalletId: Get<PalletId>;

        type WeightInfo: WeightData;
    }

    pub trait WeightData {
        fn register_asset() -> Weight;
        fn deposit() -> Weight;
        fn withdraw() -> Weight;
        fn confidential_transfer() -> Weight;
        fn set_operator() -> Weight;
        fn revoke_operator() -> Weight;
    }
    impl WeightData for () {
        fn register_asset() -> Weight {
            Weight::from_parts(10_000, 0)
        }
        fn deposit() -> Weight {
            Weight::from_parts(30_000, 0)
        }
        fn withdraw() -> Weight {
            Weight::from_parts(30_000, 0)
        }
        fn confidential_transfer() -> Weight {
            Weight::from_parts(20_000, 0)
        }
        fn set_operator() -> Weight {
            Weight::from_parts(10_000, 0)
        }
        fn revoke_operator() -> Weight {
            Weight::from_parts(10_000, 0)
        }
    }

    #[derive(Encode, Decode, Clone, Eq, PartialEq, RuntimeDebug, TypeInfo, MaxEncodedLen)]
    pub struct PendingWithdrawal<AssetId, AccountId> {
        pub asset: AssetId,
        pub to: AccountId,
    }

    #[pallet::pallet]
    pub struct Pallet<T>(_);

    /// AssetId => underlying units per confidential unit
    #[pallet::storage]
    pub type Rates<T: Config> = StorageMap<_, Blake2_128Concat, T::AssetId, u128, OptionQuery>;

    /// (AssetId, Holder) => encrypted balance
    #[pallet::storage]
    pub type Balances<T: Config> = StorageDoubleMap<
        _,
        Blake2_128Concat,
        T::AssetId,
        Blake2_128Concat,
        T::AccountId,
        Euint64,
        OptionQuery,
    >;

    #[pallet::storage]
    pub type TotalSupply<T: Config> =
        StorageMap<_, Blake2_128Concat, T::AssetId, Euint64, OptionQuery>;

    /// (Holder, AssetId, Operator) => until block
    #[pallet::storage]
    pub type Operators<T: Config> = StorageNMap<
        _,
        (
            NMapKey<Blake2_128Concat, T::AccountId>,
            NMapKey<Blake2_128Concat, T::AssetId>,
            NMapKey<Blake2_128Concat, T::AccountId>,
        ),
        BlockNumberFor<T>,
        OptionQuery,
    >;

    /// Burns waiting for their plaintext, keyed by oracle request.
    #[pallet::storage]
    pub type PendingWithdrawals<T: Config> = StorageMap<
        _,
        Blake2_128Concat,
        RequestId,
        PendingWithdrawal<T::AssetId, T::AccountId>,
        OptionQuery,
    >;

    #[pallet::event]
    #[pallet::generate_deposit(pub(super) fn deposit_event)]
    pub enum Event<T: Config> {
        AssetRegistered {
            asset: T::AssetId,
            rate: u128,
        },
        Deposited {
            asset: T::AssetId,
            from: T::AccountId,
            to: T::AccountId,
            amount: u128,
            minted: Euint64,
        },
        ConfidentialTransfer {
            asset: T::AssetId,
            from: T::AccountId,
            to: T::AccountId,
            transferred: Euint64,
        },
        WithdrawalRequested {
            id: RequestId,
            asset: T::AssetId,
            from: T::AccountId,
            to: T::AccountId,
            burnt: Euint64,
        },
        Withdrawn {
            id: RequestId,
            asset: T::AssetId,
            to: T::AccountId,
            amount: u128,
        },
        OperatorSet {
            asset: T::AssetId,
            holder: T::AccountId,
            operator: T::AccountId,
            until: BlockNumberFor<T>,
        },
        OperatorRevoked {
            asset: T::AssetId,
            holder: T::AccountId,
            operator: T::AccountId,
        },
    }

    #[pallet::error]
    pub enum Error<T> {
        UnknownAsset,
        AssetAlreadyRegistered,
        InvalidRate,
        /// Deposit worth less than one confidential unit.
        AmountBelowRate,
        AmountOverflow,
        /// Caller is neither the holder nor a live operator of the holder.
        UnauthorizedSpender,
        UnauthorizedCiphertextUse,
        InvalidInputProof,
        /// Withdrawal recipient cannot be the custody account.
        InvalidRecipient,
        /// No pending withdrawal for the oracle request.
        UnknownGatewayRequest,
        DuplicateRequest,
        ResultLengthMismatch,
        PayoutFailed,
        NoSuchOperator,
    }

    #[pallet::call]
    impl<T: Config> Pallet<T> {
        /// Opens a confidential wrapper for `asset` at `rate` underlying units per unit.
        #[pallet::call_index(0)]
        #[pallet::weight(T::WeightInfo::register_asset())]
        pub fn register_asset(
            origin: OriginFor<T>,
            asset: T::AssetId,
            rate: u128,
        ) -> DispatchResult {
            ensure_root(origin)?;
            ensure!(rate > 0, Error::<T>::InvalidRate);
            ensure!(!Rates::<T>::contains_key(asset), Error::<T>::AssetAlreadyRegistered);
            Rates::<T>::insert(asset, rate);
            Self::deposit_event(Event::AssetRegistered { asset, rate });
            Ok(())
        }

        /// Wraps `amount` underlying units of the caller into `to`'s encrypted balance.
        /// The remainder below one confidential unit is left with the caller.
        #[pallet::call_index(1)]
        #[pallet::weight(T::WeightInfo::deposit())]
        pub fn deposit(
            origin: OriginFor<T>,
            asset: T::AssetId,
            to: T::AccountId,
            amount: u128,
        ) -> DispatchResult {
            let from = ensure_signed(origin)?;
            T::Acl::with_transient_scope(|| Self::do_wrap(asset, &from, &to, amount)).map(|_| ())
        }

        /// Burns an existing handle the caller is allowed on and schedules the payout to `to`.
        #[pallet::call_index(2)]
        #[pallet::weight(T::WeightInfo::withdraw())]
        pub fn withdraw(
            origin: OriginFor<T>,
            asset: T::AssetId,
            from: T::AccountId,
            to: T::AccountId,
            amount: Euint64,
        ) -> DispatchResult {
            let caller = ensure_signed(origin)?;
            T::Acl::with_transient_scope(|| {
                ensure!(
                    T::Acl::is_allowed(&amount, &caller),
                    Error::<T>::UnauthorizedCiphertextUse
                );
                T::Acl::allow_transient(&amount, &Self::account_id());
                Self::do_withdraw(asset, &caller, &from, &to, amount)
            })
            .map(|_| ())
        }

        /// Same as `withdraw` with a fresh encrypted input.
        #[pallet::call_index(3)]
        #[pallet::weight(T::WeightInfo::withdraw())]
        pub fn withdraw_encrypted(
            origin: OriginFor<T>,
            asset: T::AssetId,
            from: T::AccountId,
            to: T::AccountId,
            input: ExternalEuint64,
            proof: InputProof,
        ) -> DispatchResult {
            let caller = ensure_signed(origin)?;
            T::Acl::with_transient_scope(|| {
                let amount = Self::verified_input(input, &proof)?;
                Self::do_withdraw(asset, &caller, &from, &to, amount)
            })
            .map(|_| ())
        }

        #[pallet::call_index(4)]
        #[pallet::weight(T::WeightInfo::confidential_transfer())]
        pub fn confidential_transfer(
            origin: OriginFor<T>,
            asset: T::AssetId,
            to: T::AccountId,
            input: ExternalEuint64,
            proof: InputProof,
        ) -> DispatchResult {
            let from = ensure_signed(origin)?;
            T::Acl::with_transient_scope(|| {
                let amount = Self::verified_input(input, &proof)?;
                Self::do_transfer(asset, &from, &from, &to, amount)
            })
            .map(|_| ())
        }

        /// Moves `from`'s balance on its behalf. The caller must be a live operator of `from`.
        #[pallet::call_index(5)]
        #[pallet::weight(T::WeightInfo::confidential_transfer())]
        pub fn confidential_transfer_from(
            origin: OriginFor<T>,
            asset: T::AssetId,
            from: T::AccountId,
            to: T::AccountId,
            input: ExternalEuint64,
            proof: InputProof,
        ) -> DispatchResult {
            let spender = ensure_signed(origin)?;
            T::Acl::with_transient_scope(|| {
                let amount = Self::verified_input(input, &proof)?;
                Self::do_transfer(asset, &spender, &from, &to, amount)
            })
            .map(|_| ())
        }

        /// Holder grants or extends an operator for a specific asset until `until`.
        #[pallet::call_index(6)]
        #[pallet::weight(T::WeightInfo::set_operator())]
        pub fn set_operator(
            origin: OriginFor<T>,
            asset: T::AssetId,
            operator: T::AccountId,
            until: BlockNumberFor<T>,
        ) -> DispatchResult {
            let holder = ensure_signed(origin)?;
            Operators::<T>::insert((holder.clone(), asset, operator.clone()), until);
            Self::deposit_event(Event::OperatorSet {
                asset,
                holder,
                operator,
                until,
            });
            Ok(())
        }

        #[pallet::call_index(7)]
        #[pallet::weight(T::WeightInfo::revoke_operator())]
        pub fn revoke_operator(
            origin: OriginFor<T>,
            asset: T::AssetId,
            operator: T::AccountId,
        ) -> DispatchResult {
            let holder = ensure_signed(origin)?;
            let key = (holder.clone(), asset, operator.clone());
            ensure!(Operators::<T>::contains_key(&key), Error::<T>::NoSuchOperator);
            Operators::<T>::remove(key);
            Self::deposit_event(Event::OperatorRevoked {
                asset,
                holder,
                operator,
            });
            Ok(())
        }
    }

    impl<T: Config> Pallet<T> {
        pub fn account_id() -> T::AccountId {
            T::PalletId::get().into_account_truncating()
        }

        pub fn is_operator(
            holder: &T::AccountId,
            asset: T::AssetId,
            operator: &T::AccountId,
        ) -> bool {
            match Operators::<T>::get((holder, asset, operator)) {
                Some(until) => frame_system::Pallet::<T>::block_number() <= until,
                None => false,
            }
        }

        fn ensure_spender(
            asset: T::AssetId,
            spender: &T::AccountId,
            from: &T::AccountId,
        ) -> DispatchResult {
            ensure!(
                spender == from || Self::is_operator(from, asset, spender),
                Error::<T>::UnauthorizedSpender
            );
            Ok(())
        }

        fn rate_of(asset: T::AssetId) -> Result<u128, DispatchError> {
            Rates::<T>::get(asset).ok_or_else(|| Error::<T>::UnknownAsset.into())
        }

        fn verified_input(
            input: ExternalEuint64,
            proof: &InputProof,
        ) -> Result<Euint64, DispatchError> {
            let amount = T::Fhe::verify_input(input, proof).ok_or(Error::<T>::InvalidInputProof)?;
            T::Acl::allow_transient(&amount, &Self::account_id());
            Ok(amount)
        }

        fn ensure_lent(amount: &Euint64) -> DispatchResult {
            ensure!(
                T::Acl::is_allowed(amount, &Self::account_id()),
                Error::<T>::UnauthorizedCiphertextUse
            );
            Ok(())
        }

        fn balance_or_zero(asset: T::AssetId, who: &T::AccountId) -> Euint64 {
            Balances::<T>::get(asset, who).unwrap_or_else(T::Fhe::as_zero)
        }

        fn supply_or_zero(asset: T::AssetId) -> Euint64 {
            TotalSupply::<T>::get(asset).unwrap_or_else(T::Fhe::as_zero)
        }

        fn store_balance(asset: T::AssetId, who: &T::AccountId, balance: Euint64) {
            T::Acl::allow(&balance, &Self::account_id());
            T::Acl::allow(&balance, who);
            Balances::<T>::insert(asset, who, balance);
        }

        fn store_supply(asset: T::AssetId, supply: Euint64) {
            T::Acl::allow(&supply, &Self::account_id());
            TotalSupply::<T>::insert(asset, supply);
        }

        /// Moves `amount` unless it exceeds the balance, in which case nothing moves.
        /// Returns the handle of what actually moved, readable by both parties.
        fn do_transfer(
            asset: T::AssetId,
            spender: &T::AccountId,
            from: &T::AccountId,
            to: &T::AccountId,
            amount: Euint64,
        ) -> Result<Euint64, DispatchError> {
            Self::rate_of(asset)?;
            Self::ensure_spender(asset, spender, from)?;
            Self::ensure_lent(&amount)?;

            let from_balance = Self::balance_or_zero(asset, from);
            let covered = T::Fhe::ge(from_balance, amount);
            let transferred = T::Fhe::select(covered, amount, T::Fhe::as_zero());
            Self::store_balance(asset, from, T::Fhe::sub(from_balance, transferred));

            let to_balance = Self::balance_or_zero(asset, to);
            Self::store_balance(asset, to, T::Fhe::add(to_balance, transferred));

            T::Acl::allow(&transferred, &Self::account_id());
            T::Acl::allow(&transferred, from);
            T::Acl::allow(&transferred, to);
            if spender != from {
                T::Acl::allow(&transferred, spender);
            }

            Self::deposit_event(Event::ConfidentialTransfer {
                asset,
                from: from.clone(),
                to: to.clone(),
                transferred,
            });
            Ok(transferred)
        }

        fn do_wrap(
            asset: T::AssetId,
            from: &T::AccountId,
            to: &T::AccountId,
            amount: u128,
        ) -> Result<Euint64, DispatchError> {
            let rate = Self::rate_of(asset)?;
            let units = amount / rate;
            ensure!(units > 0, Error::<T>::AmountBelowRate);
            let units = u64::try_from(units).map_err(|_| Error::<T>::AmountOverflow)?;
            // only whole units are pulled; `units * rate <= amount`
            let pulled = u128::from(units) * rate;
            T::Fungibles::transfer(
                asset,
                from,
                &Self::account_id(),
                pulled,
                Preservation::Expendable,
            )?;

            let minted = T::Fhe::as_euint64(units);
            let balance = Self::balance_or_zero(asset, to);
            Self::store_balance(asset, to, T::Fhe::add(balance, minted));
            Self::store_supply(asset, T::Fhe::add(Self::supply_or_zero(asset), minted));
            T::Acl::allow(&minted, &Self::account_id());
            T::Acl::allow(&minted, to);

            Self::deposit_event(Event::Deposited {
                asset,
                from: from.clone(),
                to: to.clone(),
                amount: pulled,
                minted,
            });
            Ok(minted)
        }

        fn do_withdraw(
            asset: T::AssetId,
            caller: &T::AccountId,
            from: &T::AccountId,
            to: &T::AccountId,
            amount: Euint64,
        ) -> Result<RequestId, DispatchError> {
            Self::rate_of(asset)?;
            let custody = Self::account_id();
            ensure!(to != &custody, Error::<T>::InvalidRecipient);
            Self::ensure_spender(asset, caller, from)?;
            Self::ensure_lent(&amount)?;

            // burn = amount > balance ? balance : amount
            let balance = Self::balance_or_zero(asset, from);
            let burnt = T::Fhe::select(T::Fhe::gt(amount, balance), balance, amount);
            Self::store_balance(asset, from, T::Fhe::sub(balance, burnt));
            Self::store_supply(asset, T::Fhe::sub(Self::supply_or_zero(asset), burnt));
            T::Acl::allow(&burnt, &custody);
            T::Acl::allow(&burnt, from);

            let id = T::Oracle::request_decryption(&custody, &[burnt], Purpose::Withdrawal)?;
            ensure!(!PendingWithdrawals::<T>::contains_key(id), Error::<T>::DuplicateRequest);
            PendingWithdrawals::<T>::insert(
                id,
                PendingWithdrawal {
                    asset,
                    to: to.clone(),
                },
            );
            log::debug!(target: LOG_TARGET, "withdrawal pending on request {}", id);

            Self::deposit_event(Event::WithdrawalRequested {
                id,
                asset,
                from: from.clone(),
                to: to.clone(),
                burnt,
            });
            Ok(id)
        }

        fn complete_withdrawal(id: RequestId, plaintexts: &[u64]) -> DispatchResult {
            let pending =
                PendingWithdrawals::<T>::take(id).ok_or(Error::<T>::UnknownGatewayRequest)?;
            let [units] = plaintexts else {
                return Err(Error::<T>::ResultLengthMismatch.into());
            };
            let rate = Self::rate_of(pending.asset)?;
            let amount = u128::from(*units)
                .checked_mul(rate)
                .ok_or(Error::<T>::AmountOverflow)?;

            if amount > 0 {
                T::Fungibles::transfer(
                    pending.asset,
                    &Self::account_id(),
                    &pending.to,
                    amount,
                    Preservation::Expendable,
                )
                .map_err(|e| {
                    log::warn!(target: LOG_TARGET, "payout for request {} failed: {:?}", id, e);
                    Error::<T>::PayoutFailed
                })?;
            }
            log::debug!(target: LOG_TARGET, "withdrawal {} paid {} units", id, amount);

            Self::deposit_event(Event::Withdrawn {
                id,
                asset: pending.asset,
                to: pending.to,
                amount,
            });
            Ok(())
        }
    }

    impl<T: Config> ConfidentialLedger<T::AccountId> for Pallet<T> {
        type AssetId = T::AssetId;

        fn account() -> T::AccountId {
            Self::account_id()
        }

        fn rate(asset: T::AssetId) -> Option<u128> {
            Rates::<T>::get(asset)
        }

        fn balance_of(asset: T::AssetId, who: &T::AccountId) -> Option<Euint64> {
            Balances::<T>::get(asset, who)
        }

        fn transfer(
            asset: T::AssetId,
            from: &T::AccountId,
            to: &T::AccountId,
            amount: Euint64,
        ) -> Result<Euint64, DispatchError> {
            Self::do_transfer(asset, from, from, to, amount)
        }

        fn transfer_from(
            asset: T::AssetId,
            spender: &T::AccountId,
            from: &T::AccountId,
            to: &T::AccountId,
            amount: Euint64,
        ) -> Result<Euint64, DispatchError> {
            Self::do_transfer(asset, spender, from, to, amount)
        }

        fn wrap(
            asset: T::AssetId,
            from: &T::AccountId,
            to: &T::AccountId,
            amount: u128,
        ) -> Result<Euint64, DispatchError> {
            Self::do_wrap(asset, from, to, amount)
        }

        fn withdraw(
            asset: T::AssetId,
            caller: &T::AccountId,
            from: &T::AccountId,
            to: &T::AccountId,
            amount: Euint64,
        ) -> Result<RequestId, DispatchError> {
            Self::do_withdraw(asset, caller, from, to, amount)
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
                Purpose::Withdrawal => Self::complete_withdrawal(id, plaintexts),
                _ => Ok(()),
            }
        }
    }
}
