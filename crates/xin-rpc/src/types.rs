use serde::Serialize;
use xin_kernel::CNode;

/// `xin_getInfo` response body.
#[derive(Serialize, Debug, Clone)]
pub struct RpcInfo {
    pub network: String,
    pub node: String,
    pub version: String,
    pub uptime: String,
    pub epoch: u64,
    pub timestamp: u64,
    pub mint: RpcMintInfo,
    pub graph: RpcGraphInfo,
}

#[derive(Serialize, Debug, Clone)]
pub struct RpcMintInfo {
    pub pool: String,
    pub batch: u64,
}

#[derive(Serialize, Debug, Clone)]
pub struct RpcGraphInfo {
    pub consensus: Vec<RpcNodeEntry>,
    pub topology: u64,
    pub heads: Vec<RpcGraphHead>,
}

#[derive(Serialize, Debug, Clone)]
pub struct RpcNodeEntry {
    pub node: String,
    pub signer: String,
    pub payee: String,
    pub state: String,
    pub timestamp: u64,
    pub transaction: String,
}

impl From<&CNode> for RpcNodeEntry {
    fn from(cn: &CNode) -> Self {
        Self {
            node: cn.id_for_network.to_hex(),
            signer: cn.signer.to_string(),
            payee: cn.payee.to_string(),
            state: cn.state.to_string(),
            timestamp: cn.timestamp,
            transaction: cn.transaction.to_hex(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct RpcGraphHead {
    pub node: String,
    pub round: u64,
    pub hash: String,
}
