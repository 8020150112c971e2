use thiserror::Error;

/// Ledger-level error taxonomy. Validation failures carry the offending
/// detail as a message; hard invariant violations are panics, not errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Encoding / field ranges ──────────────────────────────────────────────
    #[error("syntax: {0}")]
    Syntax(String),

    #[error("asset: {0}")]
    Asset(String),

    #[error("script: {0}")]
    Script(String),

    #[error("signature: {0}")]
    Signature(String),

    #[error("utxo: {0}")]
    Utxo(String),

    // ── Typed transactions ───────────────────────────────────────────────────
    #[error("node lifecycle: {0}")]
    NodeLifecycle(String),

    #[error("mint: {0}")]
    Mint(String),

    // ── Graph / consensus ────────────────────────────────────────────────────
    #[error("chain state: {0}")]
    ChainState(String),

    #[error("consensus: {0}")]
    Consensus(String),

    // ── Persistence ──────────────────────────────────────────────────────────
    #[error("store: {0}")]
    Store(String),

    #[error(transparent)]
    Crypto(#[from] xin_crypto::CryptoError),
}

impl Error {
    /// Whether the per-chain message loop may re-enqueue the carrying
    /// snapshot instead of dropping it (a reference that is not collected
    /// yet, rather than an invalid one).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ChainState(msg) if msg.contains("not collected yet"))
    }
}
