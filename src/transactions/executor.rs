use super::Settler;
use crate::{
    error::{OperatorError, SafeTxError},
    ledger::Receipt,
    safe::{SafeOwner, SafeTxBuilder},
    signers::DynSigner,
    types::{Call, Controller},
};
use alloy::primitives::Address;
use async_trait::async_trait;
use std::fmt::Debug;
use tracing::debug;

/// Executes calls on behalf of the controller of a chain.
#[async_trait]
pub trait CallExecutor: Debug + Send + Sync {
    /// Address the calls are executed from, i.e. the owner of services and funds.
    fn controller(&self) -> Address;

    /// Whether `calls` are executed atomically in one transaction.
    fn is_atomic(&self) -> bool;

    /// Executes `calls` in order and returns the receipts of the transactions sent.
    ///
    /// Returns once every transaction is mined. The first failure stops execution.
    async fn execute(&self, calls: Vec<Call>) -> Result<Vec<Receipt>, OperatorError>;
}

/// [`CallExecutor`] sending through a [`Settler`], either directly from the EOA or batched
/// through the controller Safe.
#[derive(Debug, Clone)]
pub struct ControllerExecutor {
    settler: Settler,
    signer: DynSigner,
    controller: Controller,
    multisend: Address,
}

impl ControllerExecutor {
    /// Creates an executor for `controller`. The settler must send from the controller's EOA.
    pub fn new(
        settler: Settler,
        signer: DynSigner,
        controller: Controller,
        multisend: Address,
    ) -> Self {
        Self { settler, signer, controller, multisend }
    }
}

#[async_trait]
impl CallExecutor for ControllerExecutor {
    fn controller(&self) -> Address {
        self.controller.address()
    }

    fn is_atomic(&self) -> bool {
        self.controller.is_safe()
    }

    async fn execute(&self, calls: Vec<Call>) -> Result<Vec<Receipt>, OperatorError> {
        if calls.is_empty() {
            return Err(SafeTxError::EmptyBatch.into());
        }

        match self.controller {
            Controller::Safe { safe, .. } => {
                let mut builder = SafeTxBuilder::new(self.settler.chain_id(), safe, self.multisend)
                    .with_owner(SafeOwner::Signer(self.signer.clone()));
                for call in calls {
                    builder.add(call)?;
                }
                debug!(%safe, calls = builder.calls().len(), "executing batch through safe");
                Ok(vec![builder.settle(&self.settler).await?])
            }
            Controller::Eoa(_) => {
                let mut receipts = Vec::with_capacity(calls.len());
                for call in calls {
                    let receipt = self
                        .settler
                        .settle(|| {
                            let call = call.clone();
                            async move { Ok(call) }
                        })
                        .await?;
                    receipts.push(receipt);
                }
                Ok(receipts)
            }
        }
    }
}
