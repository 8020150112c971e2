//! The consensus kernel: per-node round DAGs cross-referenced across
//! chains, threshold-aggregate snapshot finalization over a dynamic
//! committee, the deterministic reward-mint schedule, and the node
//! election/removal machinery, all driven by per-chain actor loops.

pub mod chain;
pub mod clock;
pub mod config;
pub mod election;
pub mod finalization;
pub mod genesis;
pub mod graph;
pub mod mint;
pub mod node;

pub use chain::{Chain, CosiAction, CosiActionKind};
pub use config::Custom;
pub use election::election_loop;
pub use genesis::{Genesis, GenesisDomain, GenesisNode};
pub use graph::{CacheRound, ChainState, FinalRound};
pub use mint::{mint_loop, pledge_amount, pool_size};
pub use node::{CNode, Gossip, NoGossip, Node};
