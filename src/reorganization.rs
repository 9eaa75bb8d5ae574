//! Best-chain switching
//!
//! Disconnects the current chain down to the common ancestor and connects the
//! new branch up to its tip against one test pool. Registry changes are
//! journaled and tree changes are staged on copies of the touched nodes only.
//! Nothing reaches the store or the tree, and the registries are rolled back,
//! unless every block connects and the batch write succeeds.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::block::{
    connect_block, disconnect_block, BlockConnection, BlockContext, BlockPosition, ChainState,
};
use crate::block_index::{BlockId, BlockIndex, BlockTree, DiskBlockIndexRecord};
use crate::error::{ConsensusError, Result};
use crate::params::ChainParams;
use crate::registry::Registries;
use crate::script::ScriptVerifier;
use crate::storage::{LedgerStore, WriteBatch};
use crate::types::*;
use crate::utxo::{stage_test_pool, TestPool, ValidationContext};

/// A block that joined the main chain
#[derive(Debug, Clone)]
pub struct ConnectedBlock {
    pub id: BlockId,
    pub block: Block,
    pub connection: BlockConnection,
}

/// Blocks that left and joined the main chain in one switch
#[derive(Debug, Clone, Default)]
pub struct ChainSwitch {
    pub fork: Option<BlockId>,
    /// Old tip first
    pub disconnected: Vec<Block>,
    /// Oldest first
    pub connected: Vec<ConnectedBlock>,
}

/// Fork point, blocks to disconnect (tip first) and blocks to connect
/// (oldest first) for making `new_tip` the best block
pub fn chain_paths(
    tree: &BlockTree,
    new_tip: BlockId,
) -> Result<(Option<BlockId>, Vec<BlockId>, Vec<BlockId>)> {
    let fork = match tree.best() {
        Some(best) => Some(tree.find_fork(best, new_tip).ok_or_else(|| {
            ConsensusError::BlockValidation(format!(
                "{} shares no ancestor with the best chain",
                hex::encode(tree.get(new_tip).hash)
            ))
        })?),
        None => None,
    };

    let walk = |from: Option<BlockId>| {
        let mut ids = Vec::new();
        let mut cursor = from;
        while let Some(id) = cursor {
            if Some(id) == fork {
                break;
            }
            ids.push(id);
            cursor = tree.get(id).prev;
        }
        ids
    };

    let disconnect = walk(tree.best());
    let mut connect = walk(Some(new_tip));
    connect.reverse();
    Ok((fork, disconnect, connect))
}

struct SwitchPlan {
    fork: Option<BlockId>,
    disconnect: Vec<BlockId>,
    connect: Vec<BlockId>,
    new_tip: BlockId,
}

/// Copies of the index nodes a switch changes
type StagedNodes = BTreeMap<BlockId, BlockIndex>;

/// Reorganize: make `new_tip` the best block, all or nothing.
///
/// 1. find the fork f of the best chain and `new_tip`
/// 2. DisconnectBlock each old block from the tip down to f
/// 3. ConnectBlock each new block from f up to `new_tip`
/// 4. write spends, index records and the best-chain hash in one batch
/// 5. only then apply the staged nodes and keep the registry changes
///
/// Extending the tip is the degenerate case with nothing to disconnect.
pub fn reorganize(
    tree: &mut BlockTree,
    store: &mut dyn LedgerStore,
    registries: &mut Registries,
    verifier: &dyn ScriptVerifier,
    params: &ChainParams,
    new_tip: BlockId,
) -> Result<ChainSwitch> {
    let (fork, disconnect, connect) = chain_paths(tree, new_tip)?;
    if !disconnect.is_empty() {
        info!(
            "REORGANIZE: disconnect {} blocks, connect {} blocks to {}",
            disconnect.len(),
            connect.len(),
            hex::encode(tree.get(new_tip).hash)
        );
    }
    let plan = SwitchPlan { fork, disconnect, connect, new_tip };

    let checkpoint = registries.checkpoint();
    let (switch, nodes) = match stage_switch(tree, store, registries, verifier, params, &plan) {
        Ok(staged) => staged,
        Err(err) => {
            registries.rollback(checkpoint);
            return Err(err);
        }
    };
    registries.commit();

    for (id, node) in nodes {
        *tree.get_mut(id) = node;
    }
    tree.set_best(new_tip);
    info!(
        "best chain {} height {} trust {}",
        hex::encode(tree.get(new_tip).hash),
        tree.get(new_tip).height,
        tree.get(new_tip).chain_trust
    );
    Ok(switch)
}

fn stage_switch(
    tree: &BlockTree,
    store: &mut dyn LedgerStore,
    registries: &mut Registries,
    verifier: &dyn ScriptVerifier,
    params: &ChainParams,
    plan: &SwitchPlan,
) -> Result<(ChainSwitch, StagedNodes)> {
    let mut test_pool = TestPool::new();
    let mut switch = ChainSwitch { fork: plan.fork, ..ChainSwitch::default() };

    for id in &plan.disconnect {
        let index = tree.get(*id);
        let block = store
            .read_block(index.file, index.block_pos)
            .map_err(ConsensusError::Storage)?;
        disconnect_block(&block, &*store, &mut test_pool, registries)?;
        switch.disconnected.push(block);
    }

    let mut parent = plan.fork.map(|f| ChainState::from_index(tree.get(f)));
    for id in &plan.connect {
        let index = tree.get(*id);
        let block = store
            .read_block(index.file, index.block_pos)
            .map_err(ConsensusError::Storage)?;
        let ctx = BlockContext {
            store: &*store,
            heights: tree,
            verifier,
            params,
            context: ValidationContext::Block,
        };
        let position = BlockPosition { file: index.file, block_pos: index.block_pos };
        let connection = connect_block(&block, position, parent.as_ref(), &mut test_pool, registries, &ctx)
            .map_err(|err| {
                warn!("block {} failed to connect: {}", hex::encode(index.hash), err);
                err
            })?;
        parent = Some(connection.state);
        switch.connected.push(ConnectedBlock { id: *id, block, connection });
    }

    let mut nodes = StagedNodes::new();
    if let Some(f) = plan.fork {
        staged_node(&mut nodes, tree, f).next = None;
    }
    for id in &plan.disconnect {
        staged_node(&mut nodes, tree, *id).next = None;
    }
    for connected in &switch.connected {
        let node = staged_node(&mut nodes, tree, connected.id);
        connected.connection.state.apply_to(node);
        node.mint = connected.connection.mint;
        let prev = node.prev;
        if let Some(prev) = prev {
            staged_node(&mut nodes, tree, prev).next = Some(connected.id);
        }
    }

    let mut batch = WriteBatch::default();
    stage_test_pool(&test_pool, &mut batch);
    batch.block_indexes = nodes
        .values()
        .map(|node| DiskBlockIndexRecord::from_node(tree, node))
        .collect();
    batch.best_chain = Some(tree.get(plan.new_tip).hash);
    store.write_batch(batch).map_err(ConsensusError::Storage)?;

    Ok((switch, nodes))
}

fn staged_node<'a>(nodes: &'a mut StagedNodes, tree: &BlockTree, id: BlockId) -> &'a mut BlockIndex {
    nodes.entry(id).or_insert_with(|| tree.get(id).clone())
}
