#![no_std]

use soroban_sdk::contracterror;

/// @title  ErrorCategory
/// @notice Groups errors by domain for monitoring, alerting, and dashboards.
/// @dev    Off-chain consumers (keepers, indexers) should switch on this value
///         first, then on the specific `ContractError` code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Contract setup and initialization errors (codes 1-99).
    Initialization,
    /// Caller identity and permission errors (codes 100-199).
    Authorization,
    /// Core state machine and puppeteer correlation errors (codes 200-299).
    StateMachine,
    /// Unbond batch lifecycle errors (codes 300-399).
    UnbondBatch,
    /// Bond / unbond ledger errors (codes 400-499).
    Ledger,
    /// Configuration errors (codes 500-599).
    Config,
    /// Safe-math errors (codes 700-799).
    Arithmetic,
}

/// @title  ContractError
/// @notice Canonical error enum shared by the Tidal contracts.
/// @dev    Codes are wire-stable. Never renumber a variant after deployment.
///         Append new variants at the end of their category block only.
///
/// Error Code Layout:
///   1  -  99  : Initialization
///   100 - 199 : Authorization
///   200 - 299 : StateMachine
///   300 - 399 : UnbondBatch
///   400 - 499 : Ledger
///   500 - 599 : Config
///   700 - 799 : Arithmetic
#[contracterror]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ContractError {
    // --- Initialization (1-99) ---
    /// Contract has not been initialized yet.
    NotInitialized = 1,

    /// Contract has already been initialized and cannot be re-initialized.
    AlreadyInitialized = 2,

    // --- Authorization (100-199) ---
    /// Caller is not the admin.
    NotAdmin = 100,

    /// `puppeteer_hook` was called by an address other than the registered
    /// puppeteer.
    NotPuppeteer = 101,

    // --- StateMachine (200-299) ---
    /// A puppeteer request is still awaiting its acknowledgement.
    PuppeteerResponseNotReceived = 200,

    /// `tick` from idle was called before `idle_min_interval` elapsed.
    IdleIntervalNotReached = 201,

    /// The requested operation is paused.
    Paused = 202,

    // --- UnbondBatch (300-399) ---
    /// No batch exists for the given id.
    BatchNotFound = 300,

    /// The requested status change is not an edge of the batch lifecycle.
    InvalidBatchTransition = 301,

    /// Payout requested for a batch that has not been withdrawn yet.
    BatchNotWithdrawn = 302,

    /// Batch is not in the status the operation requires.
    InvalidBatchStatus = 303,

    /// Emergency unbonded amount is larger than the batch expected amount.
    UnbondedAmountExceedsExpected = 304,

    /// Batch switch requested for a batch without unbond requests.
    EmptyBatch = 305,

    // --- Ledger (400-499) ---
    /// Amount argument must be strictly positive.
    InvalidAmount = 400,

    /// Bond would push the total bonded amount over the configured limit.
    BondLimitExceeded = 401,

    /// Bond amount is below the configured minimum.
    BondAmountTooLow = 402,

    /// Token is neither the base token nor a registered LSM share token.
    UnsupportedToken = 403,

    /// Unbond amount converts to zero native tokens.
    ZeroExpectedAmount = 404,

    /// Derivative supply is outstanding but nothing backs it.
    NoBacking = 405,

    // --- Config (500-599) ---
    /// Fee basis points must be in the range 0-10000.
    InvalidFeeBps = 500,

    /// A config value is out of its allowed range.
    InvalidConfig = 501,

    // --- Arithmetic (700-799) ---
    /// Integer overflow detected during a checked arithmetic operation.
    Overflow = 700,

    /// Integer underflow detected during a checked arithmetic operation.
    Underflow = 701,

    /// Division by zero in a checked arithmetic operation.
    DivisionByZero = 702,
}

/// @title  ErrorExt
/// @notice Provides category() and description() on every ContractError variant.
pub trait ErrorExt {
    /// @return The ErrorCategory bucket this error belongs to.
    fn category(&self) -> ErrorCategory;

    /// @return A static string description safe for logging or display.
    fn description(&self) -> &'static str;
}

impl ErrorExt for ContractError {
    fn category(&self) -> ErrorCategory {
        match self {
            ContractError::NotInitialized | ContractError::AlreadyInitialized => {
                ErrorCategory::Initialization
            }

            ContractError::NotAdmin | ContractError::NotPuppeteer => ErrorCategory::Authorization,

            ContractError::PuppeteerResponseNotReceived
            | ContractError::IdleIntervalNotReached
            | ContractError::Paused => ErrorCategory::StateMachine,

            ContractError::BatchNotFound
            | ContractError::InvalidBatchTransition
            | ContractError::BatchNotWithdrawn
            | ContractError::InvalidBatchStatus
            | ContractError::UnbondedAmountExceedsExpected
            | ContractError::EmptyBatch => ErrorCategory::UnbondBatch,

            ContractError::InvalidAmount
            | ContractError::BondLimitExceeded
            | ContractError::BondAmountTooLow
            | ContractError::UnsupportedToken
            | ContractError::ZeroExpectedAmount
            | ContractError::NoBacking => ErrorCategory::Ledger,

            ContractError::InvalidFeeBps | ContractError::InvalidConfig => ErrorCategory::Config,

            ContractError::Overflow | ContractError::Underflow | ContractError::DivisionByZero => {
                ErrorCategory::Arithmetic
            }
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ContractError::NotInitialized => "Contract has not been initialized",
            ContractError::AlreadyInitialized => "Contract has already been initialized",
            ContractError::NotAdmin => "Caller is not the admin",
            ContractError::NotPuppeteer => "Caller is not the registered puppeteer",
            ContractError::PuppeteerResponseNotReceived => "Puppeteer response is not received",
            ContractError::IdleIntervalNotReached => "Idle min interval is not reached",
            ContractError::Paused => "Operation is paused",
            ContractError::BatchNotFound => "No unbond batch found for the given id",
            ContractError::InvalidBatchTransition => {
                "Status change is not allowed by the batch lifecycle"
            }
            ContractError::BatchNotWithdrawn => "Unbond batch has not been withdrawn yet",
            ContractError::InvalidBatchStatus => "Unbond batch is in an unexpected status",
            ContractError::UnbondedAmountExceedsExpected => {
                "Unbonded amount exceeds the expected native amount"
            }
            ContractError::EmptyBatch => "Unbond batch has no unbond requests",
            ContractError::InvalidAmount => "Amount must be strictly positive (> 0)",
            ContractError::BondLimitExceeded => "Bond limit exceeded",
            ContractError::BondAmountTooLow => "Bond amount is below the minimum",
            ContractError::UnsupportedToken => "Token is not accepted for bonding",
            ContractError::ZeroExpectedAmount => "Unbond amount converts to zero",
            ContractError::NoBacking => "Derivative supply has no native backing",
            ContractError::InvalidFeeBps => "Fee bps must be in range 0-10000",
            ContractError::InvalidConfig => "Config value is out of range",
            ContractError::Overflow => "Integer overflow in checked arithmetic",
            ContractError::Underflow => "Integer underflow in checked arithmetic",
            ContractError::DivisionByZero => "Division by zero in checked arithmetic",
        }
    }
}
