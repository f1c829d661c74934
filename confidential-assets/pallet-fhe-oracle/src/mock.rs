use std::cell::{Cell, RefCell};

use fhe_primitives::{attestation_digest, Attestation, Euint64, OnDecryption, Purpose, RequestId};
use frame_support::{
    construct_runtime, derive_impl, ord_parameter_types, parameter_types, BoundedVec,
};
use frame_system::EnsureSignedBy;
use sp_core::{ed25519, Pair};
use sp_runtime::{BuildStorage, DispatchError, DispatchResult};

use crate as pallet_fhe_oracle;

type Block = frame_system::mocking::MockBlock<Test>;

construct_runtime!(
    pub enum Test {
        System: frame_system,
        Acl: pallet_acl,
        Oracle: pallet_fhe_oracle,
    }
);

#[derive_impl(frame_system::config_preludes::TestDefaultConfig)]
impl frame_system::Config for Test {
    type Block = Block;
}

impl pallet_acl::Config for Test {
    type RuntimeEvent = RuntimeEvent;
    type WeightInfo = ();
}

pub const RELAYER: u64 = 100;

ord_parameter_types! {
    pub const Relayer: u64 = RELAYER;
}

parameter_types! {
    pub const MaxHandles: u32 = 4;
    pub const MaxSigners: u32 = 3;
}

thread_local! {
    static DELIVERED: RefCell<Vec<(RequestId, u64, Purpose, Vec<u64>)>> = RefCell::new(Vec::new());
    static REJECT: Cell<bool> = Cell::new(false);
}

/// Records every delivered result; can be told to fail.
pub struct RecordingHook;

impl RecordingHook {
    pub fn delivered() -> Vec<(RequestId, u64, Purpose, Vec<u64>)> {
        DELIVERED.with(|d| d.borrow().clone())
    }

    pub fn reject(yes: bool) {
        REJECT.with(|r| r.set(yes));
    }
}

impl OnDecryption<u64> for RecordingHook {
    fn on_decrypted(
        id: RequestId,
        requester: &u64,
        purpose: Purpose,
        plaintexts: &[u64],
    ) -> DispatchResult {
        if REJECT.with(|r| r.get()) {
            return Err(DispatchError::Other("rejected by hook"));
        }
        DELIVERED.with(|d| d.borrow_mut().push((id, *requester, purpose, plaintexts.to_vec())));
        Ok(())
    }
}

impl pallet_fhe_oracle::Config for Test {
    type RuntimeEvent = RuntimeEvent;
    type FulfillOrigin = EnsureSignedBy<Relayer, u64>;
    type Acl = Acl;
    type OnDecryption = RecordingHook;
    type MaxHandles = MaxHandles;
    type MaxSigners = MaxSigners;
    type WeightInfo = ();
}

pub fn kms(seed: u8) -> ed25519::Pair {
    ed25519::Pair::from_seed(&[seed; 32])
}

/// Signs `plaintexts` for request `id` with each of `pairs`.
pub fn attest(
    pairs: &[ed25519::Pair],
    id: RequestId,
    handles: &[Euint64],
    plaintexts: &[u64],
) -> BoundedVec<Attestation, MaxSigners> {
    let digest = attestation_digest(id, handles, plaintexts);
    pairs
        .iter()
        .map(|pair| Attestation { signer: pair.public(), signature: pair.sign(&digest) })
        .collect::<Vec<_>>()
        .try_into()
        .expect("within signer bound")
}

pub fn new_test_ext() -> sp_io::TestExternalities {
    let storage = frame_system::GenesisConfig::<Test>::default()
        .build_storage()
        .expect("valid default genesis storage");
    let mut ext = sp_io::TestExternalities::from(storage);
    ext.execute_with(|| {
        System::set_block_number(1);
        fhe_primitives::testing::ClearFhe::reset();
        RecordingHook::reject(false);
        DELIVERED.with(|d| d.borrow_mut().clear());
        Oracle::set_signers(
            RuntimeOrigin::root(),
            vec![kms(1).public(), kms(2).public(), kms(3).public()]
                .try_into()
                .expect("within signer bound"),
            2,
        )
        .expect("valid signer set");
    });
    ext
}
