use alloy::eips::eip1559::Eip1559Estimation;

/// Minimum gas price bump that we assume to be accepted by the network.
///
/// Ref <https://github.com/ethereum-optimism/op-geth/blob/e666543dc5500428ee7c940e54263fe4968c5efd/core/txpool/legacypool/legacypool.go#L168>
/// Ref <https://github.com/paradigmxyz/reth/blob/b312799e081259a2fbdfa91fb6b43f384625bbe2/crates/transaction-pool/src/config.rs#L23-L24>
pub const MIN_GAS_PRICE_BUMP: u128 = 10;

/// Errors which may occur while estimating fees for a replacement transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FeesError {
    /// The bumped fees exceed the configured cap.
    #[error("can't afford transaction replacement")]
    CantAffordReplacement,
}

/// Returns the fees of a replacement for a transaction sent with `sent`.
///
/// Both fees are raised by at least [`MIN_GAS_PRICE_BUMP`] percent, and up to the `latest`
/// recommendation when the network moved further than that.
pub fn bump_fees(
    sent: Eip1559Estimation,
    latest: Eip1559Estimation,
    max_fee_per_gas: Option<u128>,
) -> Result<Eip1559Estimation, FeesError> {
    // Calculate the minimum values for fees that we must set to a replacement tx.
    let min_new_max_fee = sent.max_fee_per_gas * (100 + MIN_GAS_PRICE_BUMP) / 100 + 1;
    let min_new_priority_fee = sent.max_priority_fee_per_gas * (100 + MIN_GAS_PRICE_BUMP) / 100 + 1;

    let new_max_fee = min_new_max_fee.max(latest.max_fee_per_gas);
    if max_fee_per_gas.is_some_and(|cap| new_max_fee > cap) {
        return Err(FeesError::CantAffordReplacement);
    }

    Ok(Eip1559Estimation {
        max_fee_per_gas: new_max_fee,
        max_priority_fee_per_gas: min_new_priority_fee
            .max(latest.max_priority_fee_per_gas)
            .min(new_max_fee),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fees(max_fee_per_gas: u128, max_priority_fee_per_gas: u128) -> Eip1559Estimation {
        Eip1559Estimation { max_fee_per_gas, max_priority_fee_per_gas }
    }

    #[test]
    fn bumps_at_least_ten_percent() {
        let bumped = bump_fees(fees(100, 10), fees(90, 5), None).unwrap();
        assert!(bumped.max_fee_per_gas >= 110);
        assert!(bumped.max_priority_fee_per_gas >= 11);
    }

    #[test]
    fn follows_the_network_when_it_moved_further() {
        let bumped = bump_fees(fees(100, 10), fees(300, 50), None).unwrap();
        assert_eq!(bumped, fees(300, 50));
    }

    #[test]
    fn respects_cap() {
        assert_eq!(
            bump_fees(fees(100, 10), fees(100, 10), Some(105)),
            Err(FeesError::CantAffordReplacement)
        );
    }
}
