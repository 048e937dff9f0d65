//! Puppeteer boundary.
//!
//! The puppeteer owns the interchain account and executes remote operations.
//! The core sends one `PuppeteerRequest` at a time and learns the outcome
//! through `puppeteer_hook`, which arrives in a later, separate invocation.
//!
//! Correlation is two-phase:
//! 1. `issue` allocates a request id, invokes the puppeteer and leaves the
//!    slot in `WaitingForAck`.
//! 2. `record_response` accepts only the response whose id and transaction
//!    match the outstanding request; `take_response` hands it to the next
//!    `tick` exactly once.

use soroban_sdk::{contractclient, contracttype, Address, Env, String, Vec};
use tidal_errors::ContractError;

use crate::events;
use crate::math;
use crate::types::{Config, DataKey};

// ─── Request payloads ──────────────────────────────────────────────────────

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidatorAmount {
    pub validator: String,
    pub amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCoin {
    pub denom: String,
    pub amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeeTransfer {
    pub recipient: String,
    pub amount: i128,
}

/// Protocol fee leg sent from the ICA alongside a delegation.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DelegateFee {
    NoFee,
    Send(FeeTransfer),
}

impl DelegateFee {
    pub fn transfer(&self) -> Option<&FeeTransfer> {
        match self {
            DelegateFee::NoFee => None,
            DelegateFee::Send(fee) => Some(fee),
        }
    }
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DelegateMsg {
    pub items: Vec<ValidatorAmount>,
    pub fee: DelegateFee,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UndelegateMsg {
    pub batch_id: u64,
    pub items: Vec<ValidatorAmount>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RedelegateMsg {
    pub src_validator: String,
    pub dst_validator: String,
    pub amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TokenizeShareMsg {
    pub validator: String,
    pub amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LsmRedeemItem {
    pub token: Address,
    pub validator: String,
    pub amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RedeemSharesMsg {
    pub items: Vec<LsmRedeemItem>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WithdrawRewardMsg {
    pub validator: String,
}

/// Funds of unbonded batches moved from the ICA to the withdrawal manager.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferReadyBatchesMsg {
    pub batch_ids: Vec<u64>,
    /// Native amount the batches expect to receive.
    pub amount: i128,
    pub recipient: Address,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BatchWithdrawal {
    NoBatches,
    Transfer(TransferReadyBatchesMsg),
}

impl BatchWithdrawal {
    pub fn transfer(&self) -> Option<&TransferReadyBatchesMsg> {
        match self {
            BatchWithdrawal::NoBatches => None,
            BatchWithdrawal::Transfer(msg) => Some(msg),
        }
    }
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClaimRewardsMsg {
    pub validators: Vec<String>,
    pub withdrawal: BatchWithdrawal,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IbcTransferMsg {
    pub token: Address,
    pub amount: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteTransferItem {
    pub recipient: String,
    pub coin: RemoteCoin,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferMsg {
    pub items: Vec<RemoteTransferItem>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GrantDelegateMsg {
    pub grantee: String,
}

/// Remote operations understood by the puppeteer.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RequestKind {
    Delegate(DelegateMsg),
    Undelegate(UndelegateMsg),
    Redelegate(RedelegateMsg),
    TokenizeShare(TokenizeShareMsg),
    RedeemShares(RedeemSharesMsg),
    WithdrawReward(WithdrawRewardMsg),
    ClaimRewardsAndTransfer(ClaimRewardsMsg),
    IbcTransfer(IbcTransferMsg),
    Transfer(TransferMsg),
    GrantDelegate(GrantDelegateMsg),
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PuppeteerRequest {
    pub request_id: u64,
    /// Contract that receives the response hook (the core itself).
    pub reply_to: Address,
    pub timeout: Option<u64>,
    pub kind: RequestKind,
}

// ─── Responses ─────────────────────────────────────────────────────────────

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClaimRewardsAnswer {
    /// Native rewards withdrawn to the ICA.
    pub rewards: i128,
    /// Remote delegations observed after the claim, when the puppeteer has them.
    pub delegations: Option<Vec<ValidatorAmount>>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchTransferAnswer {
    pub batch_ids: Vec<u64>,
    /// Native amount actually delivered to the withdrawal manager.
    pub received: i128,
}

/// Structured answers attached to a successful response.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResponseAnswer {
    ClaimRewards(ClaimRewardsAnswer),
    BatchTransfer(BatchTransferAnswer),
    /// Current non-native balances of the ICA.
    Balances(Vec<RemoteCoin>),
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResponseHookSuccessMsg {
    pub request_id: u64,
    pub local_height: u32,
    pub transaction: RequestKind,
    pub answers: Vec<ResponseAnswer>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResponseHookErrorMsg {
    pub request_id: u64,
    pub transaction: RequestKind,
    pub details: String,
}

/// Outcome of a request. `Failure` carries the remote error.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResponseHookMsg {
    Success(ResponseHookSuccessMsg),
    Failure(ResponseHookErrorMsg),
}

impl ResponseHookMsg {
    pub fn request_id(&self) -> u64 {
        match self {
            ResponseHookMsg::Success(msg) => msg.request_id,
            ResponseHookMsg::Failure(msg) => msg.request_id,
        }
    }

    pub fn transaction(&self) -> &RequestKind {
        match self {
            ResponseHookMsg::Success(msg) => &msg.transaction,
            ResponseHookMsg::Failure(msg) => &msg.transaction,
        }
    }
}

// ─── Outstanding request slot ──────────────────────────────────────────────

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxStatus {
    /// No request awaits an acknowledgement.
    Idle,
    /// The puppeteer is being invoked within the current call.
    InProgress,
    WaitingForAck,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TxTransaction {
    NoRequest,
    Request(RequestKind),
}

impl TxTransaction {
    pub fn kind(&self) -> Option<&RequestKind> {
        match self {
            TxTransaction::NoRequest => None,
            TxTransaction::Request(kind) => Some(kind),
        }
    }
}

/// The single puppeteer slot. `request_id` stays set after the response
/// arrives until a `tick` consumes it.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxState {
    pub status: TxStatus,
    pub request_id: Option<u64>,
    pub transaction: TxTransaction,
}

#[contractclient(name = "PuppeteerClient")]
pub trait PuppeteerInterface {
    fn execute(env: Env, request: PuppeteerRequest);
}

pub fn tx_state(e: &Env) -> TxState {
    e.storage()
        .instance()
        .get(&DataKey::TxState)
        .unwrap_or(TxState {
            status: TxStatus::Idle,
            request_id: None,
            transaction: TxTransaction::NoRequest,
        })
}

fn save_tx_state(e: &Env, tx: &TxState) {
    e.storage().instance().set(&DataKey::TxState, tx);
}

pub fn last_response(e: &Env) -> Option<ResponseHookMsg> {
    e.storage().instance().get(&DataKey::LastResponse)
}

fn next_request_id(e: &Env) -> Result<u64, ContractError> {
    let id: u64 = e
        .storage()
        .instance()
        .get(&DataKey::RequestCounter)
        .unwrap_or(0);
    let next = math::add_u64(id, 1)?;
    e.storage().instance().set(&DataKey::RequestCounter, &next);
    Ok(next)
}

/// Sends `kind` to the puppeteer and occupies the slot until the matching
/// response is recorded.
pub fn issue(e: &Env, cfg: &Config, kind: RequestKind) -> Result<u64, ContractError> {
    let tx = tx_state(e);
    if tx.status != TxStatus::Idle {
        return Err(ContractError::PuppeteerResponseNotReceived);
    }

    let request_id = next_request_id(e)?;
    save_tx_state(
        e,
        &TxState {
            status: TxStatus::InProgress,
            request_id: Some(request_id),
            transaction: TxTransaction::Request(kind.clone()),
        },
    );

    let request = PuppeteerRequest {
        request_id,
        reply_to: e.current_contract_address(),
        timeout: Some(cfg.remote_timeout),
        kind: kind.clone(),
    };
    PuppeteerClient::new(e, &cfg.puppeteer).execute(&request);

    save_tx_state(
        e,
        &TxState {
            status: TxStatus::WaitingForAck,
            request_id: Some(request_id),
            transaction: TxTransaction::Request(kind.clone()),
        },
    );
    events::emit_request_issued(e, request_id, &kind);
    Ok(request_id)
}

/// Stores `msg` if it answers the outstanding request. Returns `false` and
/// leaves all state untouched for stale, duplicate or unexpected responses.
pub fn record_response(e: &Env, msg: ResponseHookMsg) -> bool {
    let mut tx = tx_state(e);
    let matches = tx.status == TxStatus::WaitingForAck
        && tx.request_id == Some(msg.request_id())
        && tx.transaction.kind() == Some(msg.transaction());
    if !matches {
        events::emit_response_ignored(e, msg.request_id());
        return false;
    }

    let success = matches!(msg, ResponseHookMsg::Success(_));
    events::emit_response_received(e, msg.request_id(), success);
    e.storage().instance().set(&DataKey::LastResponse, &msg);
    tx.status = TxStatus::Idle;
    save_tx_state(e, &tx);
    true
}

/// Hands the recorded response for the outstanding request to the caller
/// and frees the slot. Returns `None` when there is nothing to consume.
pub fn take_response(e: &Env) -> Option<ResponseHookMsg> {
    let tx = tx_state(e);
    if tx.status != TxStatus::Idle {
        return None;
    }
    let request_id = tx.request_id?;
    save_tx_state(
        e,
        &TxState {
            status: TxStatus::Idle,
            request_id: None,
            transaction: TxTransaction::NoRequest,
        },
    );
    last_response(e).filter(|msg| msg.request_id() == request_id)
}
