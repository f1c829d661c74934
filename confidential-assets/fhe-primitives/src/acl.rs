//! Capability grants over ciphertext handles

use crate::Euint64;

/// Access-control list keyed by `(handle, principal)`.
///
/// Persistent grants live as long as the handle is referenced. Transient grants only survive
/// until the outermost [`AclProvider::with_transient_scope`] frame exits, which is how one
/// component lends a ciphertext to another for a single call.
pub trait AclProvider<AccountId> {
    fn allow(handle: &Euint64, who: &AccountId);
    fn allow_transient(handle: &Euint64, who: &AccountId);
    fn is_allowed(handle: &Euint64, who: &AccountId) -> bool;
    fn enter_scope();
    fn exit_scope();

    /// Runs `f` inside a call frame. Nested frames share the outermost frame's transient set.
    fn with_transient_scope<R>(f: impl FnOnce() -> R) -> R {
        Self::enter_scope();
        let result = f();
        Self::exit_scope();
        result
    }
}
