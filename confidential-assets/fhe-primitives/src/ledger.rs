//! Confidential ledger surface consumed by other pallets
use frame_support::pallet_prelude::*;

use crate::{Euint64, RequestId};

/// Encrypted-balance ledger of wrapped assets.
///
/// Handles passed in must have been lent to [`ConfidentialLedger::account`] (see
/// [`crate::AclProvider::allow_transient`]). Transfers return the handle of the amount that
/// actually moved so callers can keep computing on it.
pub trait ConfidentialLedger<AccountId> {
    type AssetId;

    /// Principal the ledger acts as when it checks grants and holds custody.
    fn account() -> AccountId;

    /// Underlying units per confidential unit, `None` for unregistered assets.
    fn rate(asset: Self::AssetId) -> Option<u128>;

    fn balance_of(asset: Self::AssetId, who: &AccountId) -> Option<Euint64>;

    /// `from` moves its own balance to `to`.
    fn transfer(
        asset: Self::AssetId,
        from: &AccountId,
        to: &AccountId,
        amount: Euint64,
    ) -> Result<Euint64, DispatchError>;

    /// `spender` moves `from`'s balance; `spender` must be `from` or one of its operators.
    fn transfer_from(
        asset: Self::AssetId,
        spender: &AccountId,
        from: &AccountId,
        to: &AccountId,
        amount: Euint64,
    ) -> Result<Euint64, DispatchError>;

    /// Pulls `amount` underlying units from `from` and mints `amount / rate` to `to`.
    fn wrap(
        asset: Self::AssetId,
        from: &AccountId,
        to: &AccountId,
        amount: u128,
    ) -> Result<Euint64, DispatchError>;

    /// Burns from `from` and schedules the underlying payout to `to` once the burnt amount
    /// is decrypted.
    fn withdraw(
        asset: Self::AssetId,
        caller: &AccountId,
        from: &AccountId,
        to: &AccountId,
        amount: Euint64,
    ) -> Result<RequestId, DispatchError>;
}
