use soroban_sdk::{contracttype, Address, String};

// ─── Configuration ─────────────────────────────────────────────────────────

/// Core configuration. Written at `initialize`, replaced field-by-field by
/// `update_config`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Local token contract of the base denom.
    pub base_token: Address,
    /// Denom of the staked asset on the remote chain.
    pub remote_denom: String,
    /// Derivative token contract; the core is its mint admin.
    pub token: Address,
    pub puppeteer: Address,
    pub strategy: Address,
    pub validators_set: Address,
    pub withdrawal_voucher: Address,
    /// Receives the funds of withdrawn batches.
    pub withdrawal_manager: Address,
    /// Minimum seconds between two ticks that start from `Idle`.
    pub idle_min_interval: u64,
    /// Seconds a batch accepts unbond requests before it is frozen.
    pub unbond_batch_switch_time: u64,
    pub unbonding_period: u64,
    /// Extra wait after the expected release before funds are withdrawn.
    pub unbonding_safe_period: u64,
    /// Maximum total bonded amount, 0 = unlimited.
    pub bond_limit: i128,
    pub min_bond_amount: i128,
    pub lsm_min_bond_amount: i128,
    /// Number of distinct share tokens that triggers a redeem.
    pub lsm_redeem_threshold: u32,
    pub lsm_redeem_max_interval: u64,
    /// Protocol fee on claimed rewards, in basis points.
    pub fee_bps: u32,
    /// Remote address receiving the protocol fee.
    pub fee_address: String,
    /// Timeout in seconds forwarded with every puppeteer request.
    pub remote_timeout: u64,
    pub emergency_address: String,
}

/// Partial config update. `None` keeps the stored value.
#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigOptional {
    pub base_token: Option<Address>,
    pub remote_denom: Option<String>,
    pub token: Option<Address>,
    pub puppeteer: Option<Address>,
    pub strategy: Option<Address>,
    pub validators_set: Option<Address>,
    pub withdrawal_voucher: Option<Address>,
    pub withdrawal_manager: Option<Address>,
    pub idle_min_interval: Option<u64>,
    pub unbond_batch_switch_time: Option<u64>,
    pub unbonding_period: Option<u64>,
    pub unbonding_safe_period: Option<u64>,
    pub bond_limit: Option<i128>,
    pub min_bond_amount: Option<i128>,
    pub lsm_min_bond_amount: Option<i128>,
    pub lsm_redeem_threshold: Option<u32>,
    pub lsm_redeem_max_interval: Option<u64>,
    pub fee_bps: Option<u32>,
    pub fee_address: Option<String>,
    pub remote_timeout: Option<u64>,
    pub emergency_address: Option<String>,
}

/// A non-native reward denom swept from the ICA to a configured receiver.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NonNativeRewardsItem {
    pub denom: String,
    /// Remote receiver of the swept balance.
    pub address: String,
    /// Balance below this amount is left on the ICA.
    pub min_amount: i128,
    pub fee_bps: u32,
    pub fee_address: String,
}

// ─── State machine ─────────────────────────────────────────────────────────

/// Phase of the core state machine.
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContractState {
    Idle,
    /// IBC transfer of locally held bond funds / LSM shares to the ICA.
    Transferring,
    /// Redemption of LSM shares into native delegations.
    Redeeming,
    NonNativeRewardsTransfer,
    Claiming,
    StakingRewards,
    StakingBond,
    Unbonding,
}

/// Per-operation pause switches.
#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Pause {
    pub bond: bool,
    pub unbond: bool,
    pub tick: bool,
}

// ─── Storage keys ──────────────────────────────────────────────────────────

#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    Admin,
    Config,
    State,
    /// Timestamp of the last tick that started from or returned to `Idle`.
    LastIdleTick,
    LastLsmRedeem,
    Pause,
    NonNativeReceivers,
    /// Accepted LSM share tokens: token -> validator.
    LsmShareTokens,
    // Puppeteer correlation
    TxState,
    LastResponse,
    RequestCounter,
    // Ledger
    Ledger,
    PendingLsmShares,
    LsmSharesToRedeem,
    Delegations,
    RemoteBalances,
    // Unbond batches
    CurrentBatch,
    OldestActiveBatch,
    /// Batch record keyed by id. Stored in `persistent()`.
    Batch(u64),
}
