use bitcoin::Amount;
use serde_json::json;
use tracing::{ debug, warn };

use crate::draft::{ DraftOutput, PaymentAmount, PaymentOutput, TransactionDraft };
use crate::error::BuildError;
use crate::method::{ FeeMethod, FeeSelection };
use crate::policy::{ ConfigStore, FeePolicy };
use crate::slider::SliderState;
use crate::wallet::{ CoinSource, TxConstructor, TxSink };

/// Whether the published evaluation matches the current inputs.
///
/// Mutations mark the engine stale and recompute synchronously before
/// returning, so callers only ever observe [`FinalizerState::Settled`];
/// a failed build settles as invalid, it is not a separate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerState {
    Stale,
    Settled,
}

/// A published derived value changed. Fired equality-gated: only when
/// the stored value differs from the newly computed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Valid,
    Fee,
    FeeRate,
    Target,
    Warning,
    Outputs,
    SliderSteps,
    SliderPosition,
}

pub type ChangeListener = Box<dyn FnMut(Change)>;

/// Everything consumers read from the engine. Fully recomputed on every
/// build, never patched field by field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvaluationResult {
    pub valid: bool,
    pub fee: Option<Amount>,
    /// sat/vB with one fractional digit; empty while invalid.
    pub fee_rate: String,
    pub target: String,
    /// Empty when nothing is wrong.
    pub warning: String,
    pub outputs: Vec<DraftOutput>,
}

/// The draft engine behind a send screen.
///
/// Holds the payment inputs, rebuilds an unsigned draft through the
/// wallet collaborators whenever one of them effectively changes, and
/// publishes the derived values. Single-threaded and synchronous: every
/// mutation runs its recompute to completion before returning.
pub struct TxFinalizer<W, C> {
    wallet: W,
    config: C,
    address: String,
    amount: PaymentAmount,
    rbf: bool,
    method: FeeMethod,
    slider: SliderState,
    state: FinalizerState,
    draft: Option<TransactionDraft>,
    result: EvaluationResult,
    listeners: Vec<ChangeListener>,
}

impl<W, C> TxFinalizer<W, C>
where
    W: CoinSource + TxConstructor + TxSink,
    C: FeePolicy + ConfigStore,
{
    /// Attach the engine to its collaborators, reconstruct the fee
    /// method from persisted flags and settle an initial evaluation.
    pub fn new(wallet: W, config: C) -> Self {
        let mut finalizer = TxFinalizer {
            wallet,
            config,
            address: String::new(),
            amount: PaymentAmount::Sats(Amount::ZERO),
            rbf: false,
            method: FeeMethod::StaticRate,
            slider: SliderState::default(),
            state: FinalizerState::Stale,
            draft: None,
            result: EvaluationResult::default(),
            listeners: Vec::new(),
        };
        finalizer.read_config();
        finalizer
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn amount(&self) -> PaymentAmount {
        self.amount
    }

    pub fn rbf(&self) -> bool {
        self.rbf
    }

    pub fn method(&self) -> FeeMethod {
        self.method
    }

    pub fn slider_steps(&self) -> u32 {
        self.slider.steps()
    }

    pub fn slider_position(&self) -> u32 {
        self.slider.position()
    }

    pub fn is_settled(&self) -> bool {
        self.state == FinalizerState::Settled
    }

    pub fn valid(&self) -> bool {
        self.result.valid
    }

    pub fn fee(&self) -> Option<Amount> {
        self.result.fee
    }

    pub fn fee_rate(&self) -> &str {
        &self.result.fee_rate
    }

    pub fn target(&self) -> &str {
        &self.result.target
    }

    pub fn warning(&self) -> &str {
        &self.result.warning
    }

    pub fn outputs(&self) -> &[DraftOutput] {
        &self.result.outputs
    }

    pub fn result(&self) -> &EvaluationResult {
        &self.result
    }

    /// The last successfully built draft, if the engine is valid.
    pub fn draft(&self) -> Option<&TransactionDraft> {
        self.draft.as_ref()
    }

    /// Register a listener for published-value changes.
    pub fn subscribe(&mut self, listener: impl FnMut(Change) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn set_address(&mut self, address: &str) {
        if self.address == address {
            return;
        }
        self.address = address.to_string();
        self.recompute();
    }

    pub fn set_amount(&mut self, amount: PaymentAmount) {
        if self.amount == amount {
            return;
        }
        self.amount = amount;
        self.recompute();
    }

    pub fn set_rbf(&mut self, rbf: bool) {
        if self.rbf == rbf {
            return;
        }
        self.rbf = rbf;
        self.recompute();
    }

    /// Switch fee strategy. The slider range is re-read from the policy
    /// store and the position replaced by that strategy's current one
    /// before the selection is persisted and the draft rebuilt.
    pub fn set_method(&mut self, method: FeeMethod) {
        if self.method == method {
            return;
        }
        self.method = method;
        self.update_slider();
        self.save_config();
        self.recompute();
    }

    pub fn set_slider_position(&mut self, position: u32) {
        if !self.slider.set_position(position) {
            return;
        }
        self.emit(Change::SliderPosition);
        self.save_config();
        self.recompute();
    }

    /// Hand the current draft to the signing/broadcast collaborator.
    /// Logged no-op when there is no valid draft.
    pub fn send_onchain(&mut self) {
        match &self.draft {
            Some(draft) if self.result.valid => self.wallet.sign_and_broadcast(draft),
            _ => debug!("no valid draft to send"),
        }
    }

    fn read_config(&mut self) {
        self.method =
            FeeMethod::from_flags(self.config.is_dynfee(), self.config.use_mempool_fees());
        self.update_slider();
        self.recompute();
    }

    fn update_slider(&mut self) {
        let next = SliderState::refresh(&self.config, self.method);
        if next.steps() != self.slider.steps() {
            self.emit(Change::SliderSteps);
        }
        if next.position() != self.slider.position() {
            self.emit(Change::SliderPosition);
        }
        self.slider = next;
    }

    /// Persist the fee selection: both method flags, then exactly one of
    /// the three native-parameter keys, picked by the selection variant.
    fn save_config(&mut self) {
        let (dynamic, mempool) = self.method.flags();
        let selection =
            FeeSelection::for_position(self.method, self.slider.position(), &self.config);
        self.config.set_key("dynamic_fees", json!(dynamic), false);
        self.config.set_key("mempool_fees", json!(mempool), false);
        match selection {
            FeeSelection::Static { sat_per_kvb } => {
                self.config.set_key("fee_per_kb", json!(sat_per_kvb), true)
            }
            FeeSelection::EtaTarget { level } => self.config.set_key("fee_level", json!(level), true),
            FeeSelection::MempoolDepth { level } => {
                self.config.set_key("depth_level", json!(level), true)
            }
        }
    }

    /// Rebuild the draft from current inputs and publish the evaluation.
    /// Build failures settle as an invalid result; nothing escapes this
    /// boundary.
    pub fn recompute(&mut self) {
        self.state = FinalizerState::Stale;
        let target = self.config.get_fee_target().label;
        let next = match self.build_draft() {
            Ok(draft) => self.evaluate(draft, target),
            Err(err) => {
                warn!(%err, "could not build transaction draft");
                self.draft = None;
                EvaluationResult {
                    valid: false,
                    fee: None,
                    fee_rate: String::new(),
                    target,
                    warning: err.user_message(),
                    outputs: Vec::new(),
                }
            }
        };
        self.publish(next);
        self.state = FinalizerState::Settled;
    }

    fn build_draft(&self) -> Result<TransactionDraft, BuildError> {
        let fee_rate_per_kvb = self
            .config
            .fee_per_kb()
            .ok_or(BuildError::NoDynamicFeeEstimates)?;
        let coins = self.wallet.spendable_coins(None);
        let outputs = [PaymentOutput {
            address: self.address.clone(),
            value: self.amount,
        }];
        self.wallet
            .build_unsigned(&coins, &outputs, None, fee_rate_per_kvb, self.rbf)
    }

    fn evaluate(&mut self, draft: TransactionDraft, target: String) -> EvaluationResult {
        let amount = match self.amount {
            PaymentAmount::Sats(amount) => amount,
            PaymentAmount::Max => draft.output_value(),
        };
        let fee = draft.fee;
        let size = draft.estimated_size;
        debug!(
            fee = fee.to_sat(),
            inputs = draft.inputs_count,
            outputs = draft.outputs.len(),
            "built transaction draft"
        );
        let fee_rate = format!("{:.1}", fee.to_sat() as f64 / size as f64);
        let warning = self
            .config
            .get_tx_fee_warning(amount, size, fee)
            .map(|w| w.long_message)
            .unwrap_or_default();
        let outputs = draft.outputs.clone();
        self.draft = Some(draft);
        EvaluationResult {
            valid: true,
            fee: Some(fee),
            fee_rate,
            target,
            warning,
            outputs,
        }
    }

    fn publish(&mut self, next: EvaluationResult) {
        if next.valid != self.result.valid {
            self.emit(Change::Valid);
        }
        if next.fee != self.result.fee {
            self.emit(Change::Fee);
        }
        if next.fee_rate != self.result.fee_rate {
            self.emit(Change::FeeRate);
        }
        if next.target != self.result.target {
            self.emit(Change::Target);
        }
        if next.warning != self.result.warning {
            self.emit(Change::Warning);
        }
        if next.outputs != self.result.outputs {
            self.emit(Change::Outputs);
        }
        self.result = next;
    }

    fn emit(&mut self, change: Change) {
        for listener in &mut self.listeners {
            listener(change);
        }
    }
}
