use std::sync::Arc;

use tracing::{info, warn};
use xin_core::{
    Address, Error, Integer, Script, Snapshot, Transaction, VersionedTransaction,
    MINT_GROUP_KERNEL_NODE, OPERATOR_64, OUTPUT_TYPE_SCRIPT, XIN_ASSET_ID,
};
use xin_crypto::{view_ghost_output_key, PrivateKey};

use crate::clock;
use crate::config::{
    DAY_NS, HOUR_NS, KERNEL_MINT_TIME_BEGIN, KERNEL_MINT_TIME_END, MAINNET_ID,
    MAINNET_MINT_PERIOD_FORK_BATCH, MAINNET_MINT_PERIOD_FORK_TIME_BEGIN,
    MAINNET_MINT_PERIOD_FORK_TIME_END,
};
use crate::node::{CNode, Node};

pub const MINT_YEAR_SHARES: u64 = 10;
pub const MINT_YEAR_BATCHES: u64 = 365;
pub const MINT_NODE_MAXIMUM: u64 = 50;

fn mint_pool() -> Integer {
    Integer::from_value(500_000)
}

fn mint_liquidity() -> Integer {
    Integer::from_value(500_000)
}

/// Undistributed pool remaining after `batch` daily distributions: each
/// year a tenth of the pool unlocks, and nine tenths of every unlocked
/// share goes to kernel nodes day by day.
pub fn pool_size(batch: u64) -> Integer {
    let mut mint = Integer::zero();
    let mut pool = mint_pool();
    for _ in 0..batch / MINT_YEAR_BATCHES {
        let year = pool.div(MINT_YEAR_SHARES);
        mint = mint.add(&year.div(10).mul(9));
        pool = pool.sub(&year);
    }
    let day = pool.div(MINT_YEAR_SHARES).div(MINT_YEAR_BATCHES);
    let count = batch % MINT_YEAR_BATCHES;
    if count > 0 {
        mint = mint.add(&day.div(10).mul(9).mul(count));
    }
    if mint.sign() > 0 {
        mint_pool().sub(&mint)
    } else {
        mint_pool()
    }
}

/// The stake a joining node must lock, growing with each unlocked yearly
/// share of the pool.
pub fn pledge_amount(since_epoch_ns: u64) -> Integer {
    let batch = since_epoch_ns / DAY_NS;
    let mut liquidity = mint_liquidity();
    let mut pool = mint_pool();
    for _ in 0..batch / MINT_YEAR_BATCHES {
        let share = pool.div(MINT_YEAR_SHARES);
        liquidity = liquidity.add(&share);
        pool = pool.sub(&share);
    }
    liquidity.div(MINT_NODE_MAXIMUM)
}

fn mint_seed(signer: &Address, batch: u64) -> [u8; 64] {
    let digest = xin_crypto::new_hash(format!("{}MINTKERNELNODE{}", signer, batch).as_bytes());
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(&digest.0);
    seed[32..].copy_from_slice(&digest.0);
    seed
}

fn mint_diff_seed(addr: &Address, batch: u64) -> [u8; 64] {
    let digest = xin_crypto::new_hash(format!("{}MINTKERNELNODE{}DIFF", addr, batch).as_bytes());
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(&digest.0);
    seed[32..].copy_from_slice(&digest.0);
    seed
}

/// Build the reward transaction for `batch`: one output per committee
/// node in id order, plus an unspendable diff output when the amount does
/// not divide evenly. Every key is reconstructible by any verifier.
pub fn build_mint_transaction(
    nodes: &[CNode],
    batch: u64,
    amount: Integer,
) -> Result<Transaction, Error> {
    if nodes.is_empty() {
        return Err(Error::Mint("no nodes to mint for".into()));
    }
    let per = amount.div(nodes.len() as u64);
    let diff = amount.sub(&per.mul(nodes.len() as u64));

    let mut tx = Transaction::new(*XIN_ASSET_ID);
    tx.add_kernel_node_mint_input(batch, amount);
    let script = Script::new_threshold(1);
    for n in nodes {
        let seed = mint_seed(&n.signer, batch);
        tx.add_script_output(
            std::slice::from_ref(&n.payee),
            script.clone(),
            per.clone(),
            &seed,
        )?;
    }
    if diff.sign() > 0 {
        let addr = Address::from_seed(&[0u8; 64]);
        let seed = mint_diff_seed(&addr, batch);
        tx.add_script_output(
            std::slice::from_ref(&addr),
            Script::new_threshold(OPERATOR_64),
            diff,
            &seed,
        )?;
    }
    Ok(tx)
}

impl Node {
    pub fn pool_size_remaining(&self) -> Result<Integer, Error> {
        let dist = self.store.read_last_mint_distribution(MINT_GROUP_KERNEL_NODE)?;
        Ok(pool_size(dist.map(|d| d.batch).unwrap_or(0)))
    }

    /// (batch, amount) mintable at `timestamp`, or (0, zero). The batch
    /// counter is days since the epoch; mints only land inside the
    /// configured hour window (mainnet had a wider window before its fork
    /// batch).
    pub fn check_mint_possibility(&self, timestamp: u64, validate_only: bool) -> (u64, Integer) {
        if timestamp <= self.epoch {
            return (0, Integer::zero());
        }
        let since = timestamp - self.epoch;
        let hours = since / HOUR_NS;
        let batch = hours / 24;
        if batch < 1 {
            return (0, Integer::zero());
        }
        let (mut kmb, mut kme) = (KERNEL_MINT_TIME_BEGIN, KERNEL_MINT_TIME_END);
        if self.network_id.to_hex() == MAINNET_ID && batch < MAINNET_MINT_PERIOD_FORK_BATCH {
            kmb = MAINNET_MINT_PERIOD_FORK_TIME_BEGIN;
            kme = MAINNET_MINT_PERIOD_FORK_TIME_END;
        }
        if hours % 24 < kmb || hours % 24 > kme {
            return (0, Integer::zero());
        }

        let mut pool = mint_pool();
        for _ in 0..batch / MINT_YEAR_BATCHES {
            pool = pool.sub(&pool.div(MINT_YEAR_SHARES));
        }
        let pool = pool.div(MINT_YEAR_SHARES);
        let total = pool.div(MINT_YEAR_BATCHES);
        let light = total.div(10);
        let full = light.mul(9);

        let dist = match self.store.read_last_mint_distribution(MINT_GROUP_KERNEL_NODE) {
            Ok(dist) => dist,
            Err(err) => {
                warn!(%err, "read last mint distribution");
                return (0, Integer::zero());
            }
        };
        let (last_batch, last_amount) = match dist {
            Some(d) => (d.batch, d.amount),
            None => (0, Integer::zero()),
        };
        if batch < last_batch {
            return (0, Integer::zero());
        }
        if batch == last_batch {
            if validate_only {
                return (batch, last_amount);
            }
            return (0, Integer::zero());
        }
        (batch, full.mul(batch - last_batch))
    }

    /// Committee members eligible for the batch, ordered by network id.
    pub fn sort_mint_nodes(&self, timestamp: u64) -> Vec<CNode> {
        let mut nodes: Vec<CNode> = self
            .consensus_nodes()
            .into_iter()
            .filter(|n| n.timestamp < timestamp)
            .collect();
        nodes.sort_by(|a, b| a.id_for_network.to_hex().cmp(&b.id_for_network.to_hex()));
        nodes
    }

    pub fn try_to_mint_kernel_node(
        self: &Arc<Self>,
        batch: u64,
        amount: Integer,
    ) -> Result<(), Error> {
        let nodes = self.sort_mint_nodes(clock::now_ns());
        let tx = build_mint_transaction(&nodes, batch, amount)?;
        let mut signed = tx.as_versioned();
        signed.sign_input(self.store.as_ref(), 0, std::slice::from_ref(&self.signer))?;
        signed.validate(self.store.as_ref())?;
        self.store.cache_put_transaction(&signed)?;
        self.append_self_empty(signed.payload_hash())
    }

    /// Verify a mint transaction's batch, amount and full output layout,
    /// reconstructing every mask and one-time key.
    pub fn validate_mint_snapshot(
        &self,
        snap: &Snapshot,
        tx: &VersionedTransaction,
    ) -> Result<(), Error> {
        let mut timestamp = snap.timestamp;
        if timestamp == 0 && snap.node_id == self.id_for_network {
            timestamp = clock::now_ns();
        }
        let (batch, amount) = self.check_mint_possibility(timestamp, true);
        if batch < 1 || amount.sign() <= 0 {
            return Err(Error::Mint(format!("no mint available {} {}", batch, amount)));
        }
        let mint = tx.inputs[0]
            .mint
            .as_ref()
            .ok_or_else(|| Error::Mint("missing mint input".into()))?;
        if mint.batch != batch || mint.amount != amount {
            return Err(Error::Mint(format!(
                "invalid mint data {} {}",
                batch, amount
            )));
        }

        let nodes = self.sort_mint_nodes(timestamp);
        if nodes.is_empty() {
            return Err(Error::Mint("no nodes to mint for".into()));
        }
        let per = amount.div(nodes.len() as u64);
        let diff = amount.sub(&per.mul(nodes.len() as u64));

        if diff.sign() > 0 {
            if nodes.len() + 1 != tx.outputs.len() {
                return Err(Error::Mint(format!(
                    "invalid mint outputs count with diff {} {} {} {}",
                    nodes.len(),
                    tx.outputs.len(),
                    per,
                    diff
                )));
            }
            let out = &tx.outputs[nodes.len()];
            if out.amount != diff {
                return Err(Error::Mint(format!("invalid mint diff {}", diff)));
            }
            if out.output_type != OUTPUT_TYPE_SCRIPT {
                return Err(Error::Mint(format!("invalid mint diff type {}", out.output_type)));
            }
            if out.script != Script::new_threshold(OPERATOR_64) {
                return Err(Error::Mint(format!("invalid mint diff script {}", out.script)));
            }
            if out.keys.len() != 1 {
                return Err(Error::Mint(format!("invalid mint diff keys {}", out.keys.len())));
            }
            let addr = Address::from_seed(&[0u8; 64]);
            let seed = mint_diff_seed(&addr, mint.batch);
            let r = PrivateKey::from_seed(&seed)?;
            if r.public().key() != out.mask {
                return Err(Error::Mint(format!(
                    "invalid mint diff mask {} {}",
                    r.public().key(),
                    out.mask
                )));
            }
            let ghost = view_ghost_output_key(
                &out.mask.as_public()?,
                &out.keys[0].as_public()?,
                &addr.view_key(),
                nodes.len() as u64,
            );
            if ghost.key() != addr.public_spend.key() {
                return Err(Error::Mint(format!(
                    "invalid mint diff signature {} {}",
                    addr.public_spend.key(),
                    ghost.key()
                )));
            }
        } else if nodes.len() != tx.outputs.len() {
            return Err(Error::Mint(format!(
                "invalid mint outputs count {} {}",
                nodes.len(),
                tx.outputs.len()
            )));
        }

        for (i, out) in tx.outputs.iter().enumerate().take(nodes.len()) {
            if out.output_type != OUTPUT_TYPE_SCRIPT {
                return Err(Error::Mint(format!("invalid mint output type {}", out.output_type)));
            }
            if out.amount != per {
                return Err(Error::Mint(format!(
                    "invalid mint output amount {} {}",
                    per, out.amount
                )));
            }
            if out.script != Script::new_threshold(1) {
                return Err(Error::Mint(format!("invalid mint output script {}", out.script)));
            }
            if out.keys.len() != 1 {
                return Err(Error::Mint(format!("invalid mint output keys {}", out.keys.len())));
            }
            let n = &nodes[i];
            let seed = mint_seed(&n.signer, mint.batch);
            let r = PrivateKey::from_seed(&seed)?;
            if r.public().key() != out.mask {
                return Err(Error::Mint(format!(
                    "invalid mint output mask {} {}",
                    r.public().key(),
                    out.mask
                )));
            }
            let ghost = view_ghost_output_key(
                &out.mask.as_public()?,
                &out.keys[0].as_public()?,
                &n.payee.view_key(),
                i as u64,
            );
            if ghost.key() != n.payee.public_spend.key() {
                return Err(Error::Mint(format!(
                    "invalid mint output signature {} {}",
                    n.payee.public_spend.key(),
                    ghost.key()
                )));
            }
        }

        Ok(())
    }
}

/// Long-running mint driver: every operation period, check whether a batch
/// is mintable at the graph timestamp and submit the reward transaction.
pub async fn mint_loop(node: Arc<Node>) {
    let mut shutdown = node.shutdown_signal();
    let period =
        std::time::Duration::from_secs(node.custom.node.kernel_operation_period.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let (batch, amount) = node.check_mint_possibility(node.graph_timestamp(), false);
                if batch < 1 || amount.sign() <= 0 {
                    continue;
                }
                if let Err(err) = node.try_to_mint_kernel_node(batch, amount) {
                    warn!(node = %node.id_for_network, %err, "try to mint kernel node");
                }
            }
        }
    }
    info!("mint loop stopped");
}
