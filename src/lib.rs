//! Fee selection and unsigned transaction drafting for a wallet send flow.
//!
//! [`TxFinalizer`] holds the payment inputs (address, amount, fee method,
//! slider position, RBF flag), rebuilds an unsigned draft through the
//! wallet collaborators on every effective mutation, and publishes the
//! derived fee, fee rate, warning and target description.

pub mod config;
pub mod draft;
pub mod error;
pub mod finalizer;
pub mod method;
pub mod policy;
pub mod slider;
pub mod wallet;

pub use config::WalletConfig;
pub use draft::{ DraftOutput, PaymentAmount, PaymentOutput, TransactionDraft };
pub use error::BuildError;
pub use finalizer::{ Change, EvaluationResult, FinalizerState, TxFinalizer };
pub use method::{ FeeMethod, FeeSelection, FeeStrategyDescriptor };
pub use policy::{ ConfigStore, FeePolicy, FeeSliderInfo, FeeTarget, FeeWarning };
pub use slider::SliderState;
pub use wallet::{ Coin, CoinSource, MemoryWallet, TxConstructor, TxSink };

pub const SEGWIT_V1_TXIN_VBYTES: usize = 68;
pub const SEGWIT_V1_TXOUT_VBYTES: usize = 31;
pub const TX_OVERHEAD_VBYTES: usize = 11;
