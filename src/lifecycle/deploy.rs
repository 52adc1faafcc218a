//! Steps moving a service forward: mint, update, activate, register, deploy.

use super::Observed;
use crate::{
    chains::ChainContext,
    constants::TOKEN_BOND_NATIVE_VALUE,
    error::{LifecycleError, OperatorError, SafeTxError},
    ledger::LedgerExt,
    registry::{ServiceParams, is_native},
    safe::{SafeOwner, SafeTxBuilder, exec_transaction_call, sign_safe_tx},
    types::{Call, ISafe, Service},
};
use alloy::{
    primitives::{Address, B256, U256},
    sol_types::SolValue,
};
use eyre::eyre;
use tracing::{debug, info};

/// Mints the service and returns its id.
pub(super) async fn mint(
    chain: &ChainContext,
    params: &ServiceParams,
) -> Result<U256, OperatorError> {
    let owner = chain.controller.address();
    info!(%owner, config_hash = %params.config_hash, "minting service");
    chain.executor.execute(vec![chain.registry.create(owner, params)?]).await?;

    // The newest service is ours if it carries our owner and config.
    let service_id = chain.registry.total_supply().await?;
    let info = chain.registry.service_info(service_id).await?;
    let minted_owner = chain.registry.owner_of(service_id).await?;
    if minted_owner != owner || info.config_hash != params.config_hash {
        return Err(eyre!("minted service not found at id {service_id}").into());
    }
    Ok(service_id)
}

/// Replaces the configuration of a service in `PRE_REGISTRATION`.
pub(super) async fn update(
    chain: &ChainContext,
    service_id: U256,
    params: &ServiceParams,
) -> Result<(), OperatorError> {
    info!(%service_id, config_hash = %params.config_hash, "updating service");
    chain.executor.execute(vec![chain.registry.update(service_id, params)?]).await?;
    Ok(())
}

/// Pays the security deposit.
pub(super) async fn activate(
    chain: &ChainContext,
    service_id: U256,
    observed: &Observed,
    params: &ServiceParams,
) -> Result<(), OperatorError> {
    let mut calls = Vec::new();
    let value = match chain.registry.token_deposit(service_id).await? {
        Some(deposit) => {
            calls.extend(approval(chain, deposit.token, deposit.security_deposit).await?);
            U256::from(TOKEN_BOND_NATIVE_VALUE)
        }
        None => observed.info.as_ref().map(|info| info.security_deposit).unwrap_or(params.bond),
    };
    calls.push(chain.registry.activate_registration(service_id, value));

    info!(%service_id, %value, "activating registration");
    chain.executor.execute(calls).await?;
    Ok(())
}

/// Registers agent instances into every free slot.
pub(super) async fn register(
    chain: &ChainContext,
    service: &Service,
    service_id: U256,
    observed: &Observed,
    params: &ServiceParams,
) -> Result<(), OperatorError> {
    let info = observed.info.as_ref().ok_or_else(|| eyre!("service {service_id} was not synced"))?;
    let free = info.max_agent_instances.saturating_sub(info.num_agent_instances) as usize;
    let agent_id = info.agent_ids.first().copied().unwrap_or(params.agent_id);

    let registered = chain.registry.agent_instances(service_id).await?;
    let instances: Vec<Address> = service
        .agent_addresses()
        .into_iter()
        .filter(|address| !registered.contains(address))
        .take(free)
        .collect();
    if instances.len() < free {
        return Err(LifecycleError::NotEnoughInstances { required: free, available: instances.len() }
            .into());
    }

    let count = U256::from(instances.len());
    let mut calls = Vec::new();
    let value = match chain.registry.token_deposit(service_id).await? {
        Some(deposit) => {
            let bond = chain.registry.agent_bond(service_id, agent_id).await?;
            calls.extend(approval(chain, deposit.token, bond * count).await?);
            U256::from(TOKEN_BOND_NATIVE_VALUE) * count
        }
        None => params.bond * count,
    };
    calls.push(chain.registry.register_agents(service_id, instances.clone(), agent_id, value));

    info!(%service_id, ?instances, %value, "registering agent instances");
    chain.executor.execute(calls).await?;
    Ok(())
}

/// Deploys the service multisig, either a fresh Safe or the previous multisig of the service.
pub(super) async fn deploy(
    chain: &ChainContext,
    service_id: U256,
    observed: &Observed,
    previous: Address,
    reuse: bool,
) -> Result<(), OperatorError> {
    let calls = if reuse {
        let multisig = observed
            .info
            .as_ref()
            .map(|info| info.multisig)
            .filter(|multisig| !multisig.is_zero())
            .unwrap_or(previous);
        if multisig.is_zero() {
            return Err(LifecycleError::NoPriorMultisig { service_id }.into());
        }
        let threshold = observed.info.as_ref().map(|info| info.threshold).unwrap_or(1);
        reuse_multisig_calls(chain, service_id, multisig, threshold).await?
    } else {
        vec![fresh_multisig_call(chain, service_id)]
    };

    info!(%service_id, reuse, "deploying service multisig");
    chain.executor.execute(calls).await?;
    Ok(())
}

/// Deployment through the Safe proxy factory.
///
/// The factory expects the packed setup parameters
/// `to | fallbackHandler | paymentToken | paymentReceiver | payment | nonce`.
fn fresh_multisig_call(chain: &ChainContext, service_id: U256) -> Call {
    let nonce = U256::from_be_bytes(B256::random().0);
    let data = (
        Address::ZERO,
        chain.contracts.safe_fallback_handler,
        Address::ZERO,
        Address::ZERO,
        U256::ZERO,
        nonce,
    )
        .abi_encode_packed();
    chain.registry.deploy(service_id, chain.contracts.gnosis_safe_proxy_factory, data)
}

/// Deployment reusing `multisig`, currently owned by the controller alone.
///
/// The multisig executes a batch adding every agent instance as owner and removing the
/// controller. The batch is signed by the controller and passed to the same address multisig
/// implementation, which executes it and checks the resulting owners.
async fn reuse_multisig_calls(
    chain: &ChainContext,
    service_id: U256,
    multisig: Address,
    threshold: u32,
) -> Result<Vec<Call>, OperatorError> {
    let controller = chain.controller.address();
    let owners = chain.ledger.read(multisig, ISafe::getOwnersCall {}).await?;
    if owners != [controller] {
        return Err(SafeTxError::OwnerMismatch {
            safe: multisig,
            expected: vec![controller],
            actual: owners,
        }
        .into());
    }

    let instances = chain.registry.agent_instances(service_id).await?;
    let Some(first) = instances.first().copied() else {
        return Err(LifecycleError::NotEnoughInstances { required: 1, available: 0 }.into());
    };

    let mut builder = SafeTxBuilder::new(chain.chain_id, multisig, chain.contracts.multisend);
    for instance in &instances {
        builder.add(Call::contract(
            multisig,
            ISafe::addOwnerWithThresholdCall { owner: *instance, _threshold: U256::from(1) },
        ))?;
    }
    // Owners are prepended, so the controller now follows the first instance added.
    builder.add(Call::contract(
        multisig,
        ISafe::removeOwnerCall {
            prevOwner: first,
            owner: controller,
            _threshold: U256::from(threshold),
        },
    ))?;

    let nonce = chain.ledger.read(multisig, ISafe::nonceCall {}).await?;
    let payload = builder.prepare(nonce)?;
    let signer = if chain.controller.is_safe() {
        SafeOwner::ApprovedHash(controller)
    } else {
        SafeOwner::Signer(chain.signer.clone())
    };
    let signatures = sign_safe_tx(&[signer], payload.safe_tx_hash).await?;
    let exec = exec_transaction_call(multisig, &payload, signatures);
    debug!(%multisig, safe_tx_hash = %payload.safe_tx_hash, "prepared owner migration");

    let mut data = multisig.to_vec();
    data.extend_from_slice(&exec.data);

    let mut calls = Vec::with_capacity(2);
    if chain.controller.is_safe() {
        calls.push(Call::contract(
            multisig,
            ISafe::approveHashCall { hashToApprove: payload.safe_tx_hash },
        ));
    }
    calls.push(chain.registry.deploy(
        service_id,
        chain.contracts.gnosis_safe_same_address_multisig,
        data,
    ));
    Ok(calls)
}

/// Approval of the token utility over `amount`, if the current allowance is short.
async fn approval(
    chain: &ChainContext,
    token: Address,
    amount: U256,
) -> Result<Option<Call>, OperatorError> {
    if is_native(token) {
        return Ok(None);
    }
    let allowance =
        chain.registry.token_utility_allowance(token, chain.controller.address()).await?;
    Ok((allowance < amount).then(|| chain.registry.approve_token_utility(token, amount)))
}
