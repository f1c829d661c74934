use fhe_primitives::{attestation_digest, testing::ClearFhe, Attestation, Euint64, RequestId};
use frame_support::{
    construct_runtime, derive_impl, ord_parameter_types, parameter_types,
    traits::{fungibles::Mutate, AsEnsureOriginWithArg, ConstU32, ConstU64},
    BoundedVec, PalletId,
};
use frame_system::{EnsureRoot, EnsureSigned, EnsureSignedBy};
use sp_core::{ed25519, Pair};
use sp_runtime::{traits::IdentityLookup, BuildStorage, DispatchResult};

use crate as pallet_confidential_presale;

type Block = frame_system::mocking::MockBlock<Test>;

pub type AssetId = u32;
/// Wide enough to keep `modl ++ PalletId ++ sub-id` without truncation.
pub type AccountId = u128;

construct_runtime!(
    pub enum Test {
        System: frame_system,
        Balances: pallet_balances,
        Assets: pallet_assets,
        Timestamp: pallet_timestamp,
        Acl: pallet_acl,
        Oracle: pallet_fhe_oracle,
        Ledger: pallet_confidential_ledger,
        Presale: pallet_confidential_presale,
    }
);

#[derive_impl(frame_system::config_preludes::TestDefaultConfig)]
impl frame_system::Config for Test {
    type Block = Block;
    type AccountId = AccountId;
    type Lookup = IdentityLookup<AccountId>;
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
    type CreateOrigin = AsEnsureOriginWithArg<EnsureSigned<AccountId>>;
    type Currency = Balances;
    type Extra = ();
    type ForceOrigin = EnsureRoot<AccountId>;
    type Freezer = ();
    type MetadataDepositBase = ConstU64<0>;
    type MetadataDepositPerByte = ConstU64<0>;
    type RemoveItemsLimit = ConstU32<1000>;
    type RuntimeEvent = RuntimeEvent;
    type StringLimit = ConstU32<50>;
    type WeightInfo = ();
}

impl pallet_timestamp::Config for Test {
    type Moment = u64;
    type OnTimestampSet = ();
    type MinimumPeriod = ConstU64<1>;
    type WeightInfo = ();
}

impl pallet_acl::Config for Test {
    type RuntimeEvent = RuntimeEvent;
    type WeightInfo = ();
}

pub const RELAYER: AccountId = 100;

ord_parameter_types! {
    pub const Relayer: AccountId = RELAYER;
}

parameter_types! {
    pub const MaxHandles: u32 = 4;
    pub const MaxSigners: u32 = 3;
    pub const LedgerPalletId: PalletId = PalletId(*b"cf/ledgr");
    pub const PresalePalletId: PalletId = PalletId(*b"cf/prsal");
}

impl pallet_fhe_oracle::Config for Test {
    type RuntimeEvent = RuntimeEvent;
    type FulfillOrigin = EnsureSignedBy<Relayer, AccountId>;
    type Acl = Acl;
    type OnDecryption = (Ledger, Presale);
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

impl pallet_confidential_presale::Config for Test {
    type RuntimeEvent = RuntimeEvent;
    type AssetId = AssetId;
    type Fhe = ClearFhe;
    type Acl = Acl;
    type Ledger = Ledger;
    type Oracle = Oracle;
    type Fungibles = Assets;
    type UnixTime = Timestamp;
    type PalletId = PresalePalletId;
    type WeightInfo = ();
}

pub const ALICE: AccountId = 1;
pub const BOB: AccountId = 2;
pub const CHARLIE: AccountId = 3;
pub const CREATOR: AccountId = 10;
pub const OWNER: AccountId = 99;

/// Wrapped base asset, 1_000 underlying units per confidential unit.
pub const WETH: AssetId = 1;
/// Sale token, 1_000 underlying units per confidential unit.
pub const SALE: AssetId = 2;
/// Exists in `pallet-assets` only.
pub const PLAIN: AssetId = 3;
pub const RATE: u128 = 1_000;
pub const SALE_SUPPLY: u128 = 1_000_000;
/// Confidential base units every contributor starts with.
pub const FUNDED: u64 = 50;

pub fn kms() -> ed25519::Pair {
    ed25519::Pair::from_seed(&[7; 32])
}

fn sign(
    id: RequestId,
    handles: &[Euint64],
    plaintexts: &[u64],
) -> BoundedVec<Attestation, MaxSigners> {
    let digest = attestation_digest(id, handles, plaintexts);
    let pair = kms();
    vec![Attestation { signer: pair.public(), signature: pair.sign(&digest) }]
        .try_into()
        .expect("one attestation")
}

fn handles_of(id: RequestId) -> Vec<Euint64> {
    Oracle::get_request(id).map(|r| r.handles.into_inner()).unwrap_or_default()
}

/// Plays the off-chain key holder: decrypts request `id`, signs it and relays the result.
pub fn relay(id: RequestId) -> DispatchResult {
    let handles = handles_of(id);
    let plaintexts = ClearFhe::decrypt_all(&handles);
    let attestations = sign(id, &handles, &plaintexts);
    Oracle::fulfill(
        RuntimeOrigin::signed(RELAYER),
        id,
        plaintexts.try_into().expect("within handle bound"),
        attestations,
    )
}

/// Relays a result whose first plaintext was altered after signing.
pub fn relay_tampered(id: RequestId) -> DispatchResult {
    let handles = handles_of(id);
    let mut plaintexts = ClearFhe::decrypt_all(&handles);
    let attestations = sign(id, &handles, &plaintexts);
    if let Some(first) = plaintexts.first_mut() {
        *first += 1;
    }
    Oracle::fulfill(
        RuntimeOrigin::signed(RELAYER),
        id,
        plaintexts.try_into().expect("within handle bound"),
        attestations,
    )
}

pub fn set_time(secs: u64) {
    Timestamp::set_timestamp(secs * 1_000);
}

pub fn underlying(asset: AssetId, who: AccountId) -> u128 {
    <Assets as frame_support::traits::fungibles::Inspect<AccountId>>::balance(asset, &who)
}

pub fn new_test_ext() -> sp_io::TestExternalities {
    let storage = frame_system::GenesisConfig::<Test>::default()
        .build_storage()
        .expect("valid default genesis storage");
    let mut ext = sp_io::TestExternalities::from(storage);
    ext.execute_with(|| {
        System::set_block_number(1);
        set_time(1);
        ClearFhe::reset();
        for asset in [WETH, SALE, PLAIN] {
            Assets::force_create(RuntimeOrigin::root(), asset, OWNER, true, 1)
                .expect("fresh asset");
        }
        Assets::mint_into(SALE, &CREATOR, SALE_SUPPLY).expect("mintable");
        Oracle::set_signers(
            RuntimeOrigin::root(),
            vec![kms().public()].try_into().expect("one signer"),
            1,
        )
        .expect("valid signer set");
        Ledger::register_asset(RuntimeOrigin::root(), WETH, RATE).expect("fresh asset");
        Ledger::register_asset(RuntimeOrigin::root(), SALE, RATE).expect("fresh asset");
        for who in [ALICE, BOB, CHARLIE] {
            let amount = u128::from(FUNDED) * RATE;
            Assets::mint_into(WETH, &who, amount).expect("mintable");
            Ledger::deposit(RuntimeOrigin::signed(who), WETH, who, amount).expect("funded");
        }
    });
    ext
}
