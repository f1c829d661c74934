//! Clear-text coprocessor for mock runtimes. Do NOT use in production.
//!
//! Handles map to plaintexts kept in thread-local memory, so every test thread sees its own
//! coprocessor. [`ClearFhe::decrypt`] plays the role of the off-chain key holder that the
//! decryption oracle consults before signing an attestation.

use std::{cell::RefCell, collections::BTreeMap};

use frame_support::pallet_prelude::Encode;
use sp_core::H256;

use crate::{Ebool, Euint64, ExternalEuint64, FheOps, InputProof};

const INPUT_PROOF_DOMAIN: &[u8] = b"clear-fhe/input";

#[derive(Default)]
struct Store {
    next: u64,
    values: BTreeMap<H256, u64>,
    pending_inputs: BTreeMap<H256, u64>,
}

impl Store {
    fn fresh(&mut self) -> H256 {
        self.next += 1;
        H256::from_low_u64_be(self.next)
    }

    fn issue(&mut self, value: u64) -> H256 {
        let handle = self.fresh();
        self.values.insert(handle, value);
        handle
    }

    // Uninitialized handles read as zero.
    fn value(&self, handle: &H256) -> u64 {
        self.values.get(handle).copied().unwrap_or_default()
    }
}

thread_local! {
    static STORE: RefCell<Store> = RefCell::new(Store::default());
}

fn with_store<R>(f: impl FnOnce(&mut Store) -> R) -> R {
    STORE.with(|store| f(&mut store.borrow_mut()))
}

fn input_proof(handle: &H256) -> Vec<u8> {
    (INPUT_PROOF_DOMAIN, handle).using_encoded(sp_io::hashing::blake2_256).to_vec()
}

pub struct ClearFhe;

impl ClearFhe {
    /// Client side: encrypts `value` and returns the input envelope with its proof.
    pub fn encrypt_input(value: u64) -> (ExternalEuint64, InputProof) {
        let handle = with_store(|s| {
            let handle = s.fresh();
            s.pending_inputs.insert(handle, value);
            handle
        });
        let proof = InputProof::try_from(input_proof(&handle)).expect("32 bytes fit the bound");
        (ExternalEuint64(handle), proof)
    }

    /// Key-holder side: reveals the plaintext behind `handle`.
    pub fn decrypt(handle: &Euint64) -> u64 {
        with_store(|s| s.value(&handle.0))
    }

    pub fn decrypt_all(handles: &[Euint64]) -> Vec<u64> {
        handles.iter().map(Self::decrypt).collect()
    }

    /// Forgets every handle issued on the current thread.
    pub fn reset() {
        with_store(|s| *s = Store::default());
    }

    fn binary(a: &H256, b: &H256, f: impl FnOnce(u64, u64) -> u64) -> H256 {
        with_store(|s| {
            let value = f(s.value(a), s.value(b));
            s.issue(value)
        })
    }
}

impl FheOps for ClearFhe {
    fn add(a: Euint64, b: Euint64) -> Euint64 {
        Euint64(Self::binary(&a.0, &b.0, u64::wrapping_add))
    }

    fn sub(a: Euint64, b: Euint64) -> Euint64 {
        Euint64(Self::binary(&a.0, &b.0, u64::wrapping_sub))
    }

    fn mul_plain(a: Euint64, k: u64) -> Euint64 {
        Euint64(with_store(|s| {
            let value = s.value(&a.0).wrapping_mul(k);
            s.issue(value)
        }))
    }

    fn ge(a: Euint64, b: Euint64) -> Ebool {
        Ebool(Self::binary(&a.0, &b.0, |x, y| (x >= y) as u64))
    }

    fn gt(a: Euint64, b: Euint64) -> Ebool {
        Ebool(Self::binary(&a.0, &b.0, |x, y| (x > y) as u64))
    }

    fn select(cond: Ebool, a: Euint64, b: Euint64) -> Euint64 {
        Euint64(with_store(|s| {
            let c = s.value(&cond.0);
            let (x, y) = (s.value(&a.0), s.value(&b.0));
            // Both arms are read; the mask picks one without a data-dependent branch.
            let mask = 0u64.wrapping_sub(c & 1);
            s.issue((x & mask) | (y & !mask))
        }))
    }

    fn as_euint64(value: u64) -> Euint64 {
        Euint64(with_store(|s| s.issue(value)))
    }

    fn verify_input(input: ExternalEuint64, proof: &InputProof) -> Option<Euint64> {
        if proof.as_slice() != input_proof(&input.0).as_slice() {
            return None;
        }
        with_store(|s| {
            let value = s.pending_inputs.remove(&input.0)?;
            s.values.insert(input.0, value);
            Some(Euint64(input.0))
        })
    }
}
