//! ACL Pallet
//!
//! Records which principals may decrypt or reuse a ciphertext handle. A pallet that receives
//! a handle from a caller checks [`AclProvider::is_allowed`] before storing or propagating it.
//!
//! Two kinds of grant:
//! - persistent (`Allowed`): survives until explicitly superseded,
//! - transient (`TransientAllowed`): scoped to the current call frame and wiped when the
//!   outermost [`AclProvider::with_transient_scope`] exits. Any leftover is swept at the end
//!   of the block.
#![cfg_attr(not(feature = "std"), no_std)]

pub use pallet::*;

#[cfg(test)]
mod mock;

const LOG_TARGET: &str = "runtime::acl";

#[frame_support::pallet]
pub mod pallet {
    use fhe_primitives::{AclProvider, Euint64};
    use frame_support::{pallet_prelude::*, Blake2_128Concat};
    use frame_system::pallet_prelude::*;

    use super::LOG_TARGET;

    #[pallet::config]
    pub trait Config: frame_system::Config {
        type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;
        type WeightInfo: WeightData;
    }

    pub trait WeightData {
        fn allow() -> Weight;
        fn sweep() -> Weight;
    }
    impl WeightData for () {
        fn allow() -> Weight {
            Weight::from_parts(10_000, 0)
        }
        fn sweep() -> Weight {
            Weight::from_parts(5_000, 0)
        }
    }

    /// (handle, principal) -> granted
    #[pallet::storage]
    pub type Allowed<T: Config> = StorageDoubleMap<
        _,
        Blake2_128Concat,
        Euint64,
        Blake2_128Concat,
        T::AccountId,
        (),
        OptionQuery,
    >;

    /// Grants valid for the remainder of the current call only.
    #[pallet::storage]
    pub type TransientAllowed<T: Config> = StorageDoubleMap<
        _,
        Blake2_128Concat,
        Euint64,
        Blake2_128Concat,
        T::AccountId,
        (),
        OptionQuery,
    >;

    /// Nesting depth of open call frames.
    #[pallet::storage]
    pub type TransientDepth<T> = StorageValue<_, u32, ValueQuery>;

    #[pallet::event]
    #[pallet::generate_deposit(pub(super) fn deposit_event)]
    pub enum Event<T: Config> {
        Allowed { handle: Euint64, who: T::AccountId },
    }

    #[pallet::error]
    pub enum Error<T> {
        /// The caller holds no grant on the handle it tried to share.
        UnauthorizedCiphertextUse,
    }

    #[pallet::pallet]
    pub struct Pallet<T>(_);

    #[pallet::hooks]
    impl<T: Config> Hooks<BlockNumberFor<T>> for Pallet<T> {
        fn on_initialize(_n: BlockNumberFor<T>) -> Weight {
            T::WeightInfo::sweep()
        }

        fn on_finalize(_n: BlockNumberFor<T>) {
            Self::clear_transient();
        }
    }

    #[pallet::call]
    impl<T: Config> Pallet<T> {
        /// A principal already allowed on `handle` shares a persistent grant with `who`.
        #[pallet::call_index(0)]
        #[pallet::weight(T::WeightInfo::allow())]
        pub fn allow(origin: OriginFor<T>, handle: Euint64, who: T::AccountId) -> DispatchResult {
            let caller = ensure_signed(origin)?;
            ensure!(
                <Self as AclProvider<T::AccountId>>::is_allowed(&handle, &caller),
                Error::<T>::UnauthorizedCiphertextUse
            );
            Allowed::<T>::insert(handle, &who, ());
            Self::deposit_event(Event::Allowed { handle, who });
            Ok(())
        }
    }

    impl<T: Config> Pallet<T> {
        fn clear_transient() {
            let result = TransientAllowed::<T>::clear(u32::MAX, None);
            if result.unique > 0 {
                log::debug!(target: LOG_TARGET, "cleared {} transient grants", result.unique);
            }
            TransientDepth::<T>::kill();
        }
    }

    impl<T: Config> AclProvider<T::AccountId> for Pallet<T> {
        fn allow(handle: &Euint64, who: &T::AccountId) {
            Allowed::<T>::insert(handle, who, ());
        }

        fn allow_transient(handle: &Euint64, who: &T::AccountId) {
            TransientAllowed::<T>::insert(handle, who, ());
        }

        fn is_allowed(handle: &Euint64, who: &T::AccountId) -> bool {
            Allowed::<T>::contains_key(handle, who)
                || TransientAllowed::<T>::contains_key(handle, who)
        }

        fn enter_scope() {
            TransientDepth::<T>::mutate(|depth| *depth = depth.saturating_add(1));
        }

        fn exit_scope() {
            let depth = TransientDepth::<T>::get().saturating_sub(1);
            if depth == 0 {
                Self::clear_transient();
            } else {
                TransientDepth::<T>::put(depth);
            }
        }
    }
}
