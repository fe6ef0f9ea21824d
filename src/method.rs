/// Which of the three fee selection strategies is active.
///
/// Persisted as an integer (0/1/2) and, independently, as the
/// `dynamic_fees`/`mempool_fees` boolean pair in the config store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeeMethod {
    #[default]
    StaticRate,
    DynamicTarget,
    DynamicMempoolDepth,
}

/// What a [`FeeMethod`] means for the fee policy collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeStrategyDescriptor {
    pub is_dynamic: bool,
    pub uses_mempool_depth: bool,
}

impl FeeMethod {
    pub fn descriptor(self) -> FeeStrategyDescriptor {
        match self {
            FeeMethod::StaticRate => FeeStrategyDescriptor {
                is_dynamic: false,
                uses_mempool_depth: false,
            },
            FeeMethod::DynamicTarget => FeeStrategyDescriptor {
                is_dynamic: true,
                uses_mempool_depth: false,
            },
            FeeMethod::DynamicMempoolDepth => FeeStrategyDescriptor {
                is_dynamic: true,
                uses_mempool_depth: true,
            },
        }
    }

    /// The `(dynamic_fees, mempool_fees)` pair this method persists as.
    pub fn flags(self) -> (bool, bool) {
        let d = self.descriptor();
        (d.is_dynamic, d.is_dynamic && d.uses_mempool_depth)
    }

    /// Reconstruct a method from persisted flags.
    ///
    /// `mempool` is only meaningful when `dynamic` is set; a stray
    /// `(false, true)` pair (config tampering) falls back to
    /// [`FeeMethod::StaticRate`] instead of failing the load.
    pub fn from_flags(dynamic: bool, mempool: bool) -> Self {
        if dynamic {
            if mempool {
                FeeMethod::DynamicMempoolDepth
            } else {
                FeeMethod::DynamicTarget
            }
        } else {
            FeeMethod::StaticRate
        }
    }

    pub fn index(self) -> u32 {
        match self {
            FeeMethod::StaticRate => 0,
            FeeMethod::DynamicTarget => 1,
            FeeMethod::DynamicMempoolDepth => 2,
        }
    }

    pub fn from_index(index: u32) -> Self {
        match index {
            1 => FeeMethod::DynamicTarget,
            2 => FeeMethod::DynamicMempoolDepth,
            _ => FeeMethod::StaticRate,
        }
    }
}

/// The persisted fee selection: a method plus its one native parameter.
///
/// Exactly one of `fee_per_kb`, `fee_level` and `depth_level` is
/// meaningful at a time, so the union is a tagged variant rather than
/// three optional config fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSelection {
    Static { sat_per_kvb: u64 },
    EtaTarget { level: u32 },
    MempoolDepth { level: u32 },
}

impl FeeSelection {
    /// Map a slider position to the native parameter of `method`.
    ///
    /// Only the static strategy needs the policy store here: its slider
    /// positions index a rate table, while the dynamic strategies persist
    /// the position itself as the level.
    pub fn for_position<P: crate::policy::FeePolicy + ?Sized>(
        method: FeeMethod,
        position: u32,
        policy: &P,
    ) -> Self {
        match method {
            FeeMethod::StaticRate => FeeSelection::Static {
                sat_per_kvb: policy.static_fee(position),
            },
            FeeMethod::DynamicTarget => FeeSelection::EtaTarget { level: position },
            FeeMethod::DynamicMempoolDepth => FeeSelection::MempoolDepth { level: position },
        }
    }
}
