use bitcoin::Amount;
use serde_json::Value;

/// Slider range for one fee strategy: highest valid position, the
/// currently persisted position, and the rate that position resolves to
/// right now (`None` when dynamic estimates are unavailable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSliderInfo {
    pub steps: u32,
    pub position: u32,
    pub fee_rate: Option<u64>,
}

/// Human-readable description of the configured fee target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeTarget {
    pub label: String,
    pub tooltip: String,
    pub is_dynamic: bool,
}

/// Advisory verdict on a built draft's economics.
///
/// Never affects draft validity; the engine publishes `long_message` as
/// the warning text and leaves the send decision to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeWarning {
    pub allow_send: bool,
    pub long_message: String,
    pub short_message: String,
}

/// Read side of the fee policy collaborator: slider discretizations,
/// the currently effective rate, target descriptions and fee warnings.
pub trait FeePolicy {
    /// Whether fees follow a dynamic estimator.
    fn is_dynfee(&self) -> bool;

    /// Whether the dynamic estimator targets mempool depth rather than
    /// confirmation time.
    fn use_mempool_fees(&self) -> bool;

    /// Slider range and current position for the given strategy.
    fn get_fee_slider(&self, dynamic: bool, mempool: bool) -> FeeSliderInfo;

    /// Static rate (sat/kvB) for a static-strategy slider position.
    fn static_fee(&self, position: u32) -> u64;

    /// The rate (sat/kvB) the persisted selection resolves to right now,
    /// or `None` when the required dynamic estimates are missing.
    fn fee_per_kb(&self) -> Option<u64>;

    fn get_fee_target(&self) -> FeeTarget;

    /// Flag suspicious economics for a built draft. `None` means
    /// unremarkable.
    fn get_tx_fee_warning(
        &self,
        invoice_amount: Amount,
        tx_size: usize,
        fee: Amount,
    ) -> Option<FeeWarning>;
}

/// Write side of the config collaborator.
///
/// `save` requests a flush to durable storage; flush failures are the
/// implementor's to log, never the engine's to handle.
pub trait ConfigStore {
    fn set_key(&mut self, key: &str, value: Value, save: bool);
}
