use fhe_primitives::{attestation_digest, testing::ClearFhe, Attestation, Euint64, RequestId};
use frame_support::{
    construct_runtime, derive_impl, ord_parameter_types, parameter_types,
    traits::{fungibles::Mutate, AsEnsureOriginWithArg, ConstU32, ConstU64},
    BoundedVec, PalletId,
};
use frame_system::{EnsureRoot, EnsureSigned, EnsureSignedBy};
use sp_core::{ed25519, Pair};
use sp_runtime::{BuildStorage, DispatchResult};

use crate as pallet_confidential_ledger;

type Block = frame_system::mocking::MockBlock<Test>;

pub type AssetId = u32;

construct_runtime!(
    pub enum Test {
        System: frame_system,
        Balances: pallet_balances,
        Assets: pallet_assets,
        Acl: pallet_acl,
        Oracle: pallet_fhe_oracle,
        Ledger: pallet_confidential_ledger,
    }
);

#[derive_impl(frame_system::config_preludes::TestDefaultConfig)]
impl frame_system::Config for Test {
    type Block = Block;
    type AccountData = pallet_balances::AccountData<u64>;
}

#[derive_impl(pallet_balances::config_preludes::TestDefaultConfig)]
impl pallet_balances::Config for Test {
    type AccountStore = System;
}

impl pallet_assets::Config for Test {
    type ApprovalDeposit = ConstU64<0>;
    type AssetAccountDeposit = ConstU64<0>;
    type AssetDeposit = ConstU64<0>;
    type AssetId = AssetId;
    type AssetIdParameter = AssetId;
    type Balance = u128;
    type CallbackHandle = ();
    type CreateOrigin = AsEnsureOriginWithArg<EnsureSigned<u64>>;
    type Currency = Balances;
    type Extra = ();
    type ForceOrigin = EnsureRoot<u64>;
    type Freezer = ();
    type MetadataDepositBase = ConstU64<0>;
    type MetadataDepositPerByte = ConstU64<0>;
    type RemoveItemsLimit = ConstU32<1000>;
    type RuntimeEvent = RuntimeEvent;
    type StringLimit = ConstU32<50>;
    type WeightInfo = ();
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
    pub const LedgerPalletId: PalletId = PalletId(*b"cnf/ldgr");
}

impl pallet_fhe_oracle::Config for Test {
    type RuntimeEvent = RuntimeEvent;
    type FulfillOrigin = EnsureSignedBy<Relayer, u64>;
    type Acl = Acl;
    type OnDecryption = Ledger;
    type MaxHandles = MaxHandles;
    type MaxSigners = MaxSigners;
    type WeightInfo = ();
}

impl pallet_confidential_ledger::Config for Test {
    type RuntimeEvent = RuntimeEvent;
    type AssetId = AssetId;
    type Fungibles = Assets;
    type Fhe = ClearFhe;
    type Acl = Acl;
    type Oracle = Oracle;
    type PalletId = LedgerPalletId;
    type WeightInfo = ();
}

pub const ALICE: u64 = 1;
pub const BOB: u64 = 2;
pub const CHARLIE: u64 = 3;
pub const OWNER: u64 = 99;

/// Wrapped base asset: 1_000 underlying units per confidential unit.
pub const WETH: AssetId = 1;
pub const WETH_RATE: u128 = 1_000;
/// Registered in `pallet-assets` but not wrapped.
pub const PLAIN: AssetId = 2;

pub fn kms() -> ed25519::Pair {
    ed25519::Pair::from_seed(&[7; 32])
}

/// Plays the off-chain key holder: decrypts request `id`, signs it and relays the result.
pub fn relay(id: RequestId) -> DispatchResult {
    let handles: Vec<Euint64> = Oracle::get_request(id)
        .map(|request| request.handles.into_inner())
        .unwrap_or_default();
    relay_with(id, &handles, ClearFhe::decrypt_all(&handles))
}

pub fn relay_with(id: RequestId, handles: &[Euint64], plaintexts: Vec<u64>) -> DispatchResult {
    let digest = attestation_digest(id, handles, &plaintexts);
    let pair = kms();
    let attestations: BoundedVec<Attestation, MaxSigners> =
        vec![Attestation { signer: pair.public(), signature: pair.sign(&digest) }]
            .try_into()
            .expect("one attestation");
    Oracle::fulfill(
        RuntimeOrigin::signed(RELAYER),
        id,
        plaintexts.try_into().expect("within handle bound"),
        attestations,
    )
}

pub fn underlying(asset: AssetId, who: u64) -> u128 {
    <Assets as frame_support::traits::fungibles::Inspect<u64>>::balance(asset, &who)
}

pub fn new_test_ext() -> sp_io::TestExternalities {
    let storage = frame_system::GenesisConfig::<Test>::default()
        .build_storage()
        .expect("valid default genesis storage");
    let mut ext = sp_io::TestExternalities::from(storage);
    ext.execute_with(|| {
        System::set_block_number(1);
        ClearFhe::reset();
        for asset in [WETH, PLAIN] {
            Assets::force_create(RuntimeOrigin::root(), asset, OWNER, true, 1)
                .expect("fresh asset");
            for who in [ALICE, BOB] {
                Assets::mint_into(asset, &who, 1_000_000).expect("mintable");
            }
        }
        Oracle::set_signers(
            RuntimeOrigin::root(),
            vec![kms().public()].try_into().expect("one signer"),
            1,
        )
        .expect("valid signer set");
        Ledger::register_asset(RuntimeOrigin::root(), WETH, WETH_RATE).expect("fresh asset");
    });
    ext
}
