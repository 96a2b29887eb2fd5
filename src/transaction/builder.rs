// src/transaction/builder.rs

use chrono::Duration;
use tracing::debug;

use super::keys::SigningKey;
use super::{parse_time, Operation, SignedTransaction, Transaction, TransferOperation};
use crate::ledger::{AssetAmount, LedgerError, LedgerSession, ObjectId, Result};

pub const DEFAULT_EXPIRATION_SECS: u32 = 30;

/// Builds signed single-transfer transactions in one fixed asset.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    asset_id: ObjectId,
    expiration: Duration,
}

impl TransactionBuilder {
    pub fn new(asset_id: ObjectId) -> Self {
        Self {
            asset_id,
            expiration: Duration::seconds(i64::from(DEFAULT_EXPIRATION_SECS)),
        }
    }

    pub fn with_expiration_secs(mut self, secs: u32) -> Self {
        self.expiration = Duration::seconds(i64::from(secs));
        self
    }

    /// Constructs the transfer with a zero fee, asks the node for the real fee, anchors
    /// it to the head block and signs it. Errors from the node are returned untouched.
    pub async fn build<S>(
        &self,
        session: &S,
        amount: i64,
        to: ObjectId,
        from: ObjectId,
        key: &SigningKey,
    ) -> Result<SignedTransaction>
    where
        S: LedgerSession + ?Sized,
    {
        let mut transfer = TransferOperation {
            fee: AssetAmount::new(0, self.asset_id),
            from,
            to,
            amount: AssetAmount::new(amount, self.asset_id),
            extensions: Vec::new(),
        };

        let fees = session
            .get_required_fees(&[Operation::Transfer(transfer.clone())], self.asset_id)
            .await?;
        transfer.fee = fees
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::InvalidResponse("no fee returned for transfer".to_string()))?;

        let props = session.get_dynamic_global_properties().await?;
        let (ref_block_num, ref_block_prefix) =
            reference_block(props.head_block_number, &props.head_block_id)?;
        let expiration = parse_time(&props.time)? + self.expiration;

        let transaction = Transaction {
            ref_block_num,
            ref_block_prefix,
            expiration,
            operations: vec![Operation::Transfer(transfer)],
            extensions: Vec::new(),
        };

        let digest = transaction.signing_digest(session.chain_id())?;
        let signature = key.sign_digest(digest)?;

        debug!(
            signer = %key.public_key_string(),
            ref_block_num,
            expiration = %expiration,
            "Signed transfer transaction"
        );

        Ok(SignedTransaction {
            transaction,
            signatures: vec![hex::encode(signature)],
        })
    }
}

/// Low 16 bits of the head block number and bytes 4..8 of its id, little endian.
fn reference_block(head_block_number: u32, head_block_id: &str) -> Result<(u16, u32)> {
    let id = hex::decode(head_block_id)
        .map_err(|e| LedgerError::InvalidResponse(format!("head block id: {}", e)))?;

    let prefix: [u8; 4] = id
        .get(4..8)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| LedgerError::InvalidResponse(format!("head block id too short: {}", head_block_id)))?;

    Ok(((head_block_number & 0xffff) as u16, u32::from_le_bytes(prefix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeNode, FakeSession, HEAD_BLOCK_ID};
    use crate::transaction::BRAIN_KEY_SEQUENCE;

    const ASSET: ObjectId = ObjectId::new(1, 3, 861);
    const FROM: ObjectId = ObjectId::new(1, 2, 100);
    const TO: ObjectId = ObjectId::new(1, 2, 200);

    fn key() -> SigningKey {
        SigningKey::from_brain_key("test brain key", BRAIN_KEY_SEQUENCE, "BTS").unwrap()
    }

    #[test]
    fn reference_block_fields() {
        let (num, prefix) = reference_block(0x0001_2345, HEAD_BLOCK_ID).unwrap();
        assert_eq!(num, 0x2345);
        assert_eq!(prefix, 0x7856_3412);
        assert!(reference_block(1, "0011").is_err());
        assert!(reference_block(1, "zz").is_err());
    }

    #[tokio::test]
    async fn fills_in_the_required_fee_and_signs() {
        let session = FakeSession::new("a", FakeNode::default().with_fee(2_500));
        let builder = TransactionBuilder::new(ASSET).with_expiration_secs(60);

        let signed = builder.build(&session, 150_000_000, TO, FROM, &key()).await.unwrap();

        let Operation::Transfer(op) = &signed.transaction.operations[0];
        assert_eq!(op.fee, AssetAmount::new(2_500, ASSET));
        assert_eq!(op.amount, AssetAmount::new(150_000_000, ASSET));
        assert_eq!((op.from, op.to), (FROM, TO));

        // the fee request carried the zero-fee draft
        let requested = session.fee_requests();
        assert_eq!(requested.len(), 1);
        let Operation::Transfer(draft) = &requested[0];
        assert_eq!(draft.fee.amount, 0);

        assert_eq!(signed.transaction.expiration, parse_time("2024-03-01T12:01:00").unwrap());
        assert_eq!(signed.signatures.len(), 1);
        assert_eq!(signed.signatures[0].len(), 130);
    }

    #[tokio::test]
    async fn fee_errors_propagate() {
        let session = FakeSession::new("a", FakeNode::default().failing_fees("fee schedule unavailable"));
        let err = TransactionBuilder::new(ASSET)
            .build(&session, 1, TO, FROM, &key())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "fee schedule unavailable");
    }
}
