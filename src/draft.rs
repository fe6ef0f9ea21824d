use bitcoin::Amount;

/// A payment amount: an exact satoshi value, or the spend-max sentinel
/// meaning "all available value after fee". Spend-max is only resolved
/// once a draft exists, from the draft's output value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentAmount {
    Sats(Amount),
    Max,
}

/// A requested output, before construction.
#[derive(Debug, Clone)]
pub struct PaymentOutput {
    pub address: String,
    pub value: PaymentAmount,
}

/// An output of a built draft, published verbatim for display.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DraftOutput {
    pub address: String,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub value: Amount,
    pub is_mine: bool,
}

/// An unsigned transaction candidate.
///
/// Rebuilt wholesale on every recompute and replaced atomically; never
/// patched in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDraft {
    pub inputs_count: usize,
    pub outputs: Vec<DraftOutput>,
    pub fee: Amount,
    pub estimated_size: usize,
    pub rbf: bool,
}

impl TransactionDraft {
    /// Total value across all outputs, change included.
    pub fn output_value(&self) -> Amount {
        self.outputs
            .iter()
            .fold(Amount::ZERO, |sum, o| sum + o.value)
    }
}
