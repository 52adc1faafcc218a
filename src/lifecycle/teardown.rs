//! Steps taking a service down: terminate, unbond and the multisig owner swap.

use super::{Observed, ServiceOrchestrator};
use crate::{
    chains::ChainContext,
    error::{OperatorError, SafeTxError},
    ledger::LedgerExt,
    safe::{SafeOwner, SafeTxBuilder},
    signers::DynSigner,
    types::{Call, ISafe, OnChainState, Service},
};
use alloy::primitives::{Address, U256};
use std::collections::HashSet;
use tracing::{debug, info, warn};

impl ServiceOrchestrator {
    /// Unstakes, terminates and unbonds the service, then hands its multisig back to the
    /// controller. Steps that already happened are skipped.
    pub(super) async fn teardown(
        &self,
        service: &mut Service,
        chain: &ChainContext,
        mut observed: Observed,
    ) -> Result<Observed, OperatorError> {
        let Some(service_id) = observed.service_id else {
            return Ok(observed);
        };

        if let Some(stake) = observed.stake.clone() {
            info!(program = %stake.program, "unstaking before termination");
            chain.staking.unstake(chain.executor.as_ref(), service_id, stake.contract).await?;
            observed = self.sync(service, chain).await?;
        }

        if observed.state().is_terminable() {
            self.check_owner(chain, service_id).await?;
            terminate(chain, service_id).await?;
            observed = self.sync(service, chain).await?;
        }

        if observed.state() == OnChainState::TerminatedBonded {
            unbond(chain, service_id).await?;
            observed = self.sync(service, chain).await?;
        }

        self.swap_owners(service, chain).await?;
        Ok(observed)
    }

    /// Makes the controller the sole owner of the service multisig again, if the multisig is
    /// owned by exactly the agent instances last registered for this service.
    ///
    /// Returns whether a swap was executed.
    pub(super) async fn swap_owners(
        &self,
        service: &Service,
        chain: &ChainContext,
    ) -> Result<bool, OperatorError> {
        let Some(data) = service.chain_configs.get(&chain.chain_id).map(|c| &c.chain_data) else {
            return Ok(false);
        };
        if data.multisig.is_zero() {
            return Ok(false);
        }
        let multisig = data.multisig;

        let controller = chain.controller.address();
        let owners = chain.ledger.read(multisig, ISafe::getOwnersCall {}).await?;
        if owners.contains(&controller) {
            debug!(%multisig, "controller already owns the multisig");
            return Ok(false);
        }

        let instances: HashSet<_> = data.instances.iter().copied().collect();
        let current: HashSet<_> = owners.iter().copied().collect();
        if instances.is_empty() || instances != current {
            warn!(
                %multisig,
                ?owners,
                instances = ?data.instances,
                "multisig owners differ from the agent instances, not swapping"
            );
            return Ok(false);
        }

        swap_to_controller(chain, service, multisig, &owners).await?;
        info!(%multisig, %controller, "multisig handed back to controller");
        Ok(true)
    }
}

/// Terminates the service, refunding the security deposit.
pub(super) async fn terminate(chain: &ChainContext, service_id: U256) -> Result<(), OperatorError> {
    info!(%service_id, "terminating service");
    chain.executor.execute(vec![chain.registry.terminate(service_id)]).await?;
    Ok(())
}

/// Returns the bonds of the agent instances.
pub(super) async fn unbond(chain: &ChainContext, service_id: U256) -> Result<(), OperatorError> {
    info!(%service_id, "unbonding service");
    chain.executor.execute(vec![chain.registry.unbond(service_id)]).await?;
    Ok(())
}

/// Adds the controller as owner of `multisig` and removes every other owner.
///
/// `owners` must be the current owners, in the Safe's list order. The controller is prepended
/// to the list, so it precedes each owner at the time that owner is removed. The batch is
/// signed with the keys of the current owners.
async fn swap_to_controller(
    chain: &ChainContext,
    service: &Service,
    multisig: Address,
    owners: &[Address],
) -> Result<(), OperatorError> {
    let controller = chain.controller.address();
    let mut builder = SafeTxBuilder::new(chain.chain_id, multisig, chain.contracts.multisend);
    for owner in owners {
        let key = service.agent_key(*owner).ok_or(SafeTxError::MissingOwnerKey(*owner))?;
        builder = builder.with_owner(SafeOwner::Signer(DynSigner::from_agent_key(key)?));
    }

    builder.add(Call::contract(
        multisig,
        ISafe::addOwnerWithThresholdCall { owner: controller, _threshold: U256::from(1) },
    ))?;
    for owner in owners {
        builder.add(Call::contract(
            multisig,
            ISafe::removeOwnerCall {
                prevOwner: controller,
                owner: *owner,
                _threshold: U256::from(1),
            },
        ))?;
    }

    builder.settle(&chain.settler).await?;
    Ok(())
}
