// src/transaction/wire.rs
// Binary layout of a transaction as the chain hashes it.

use super::{Operation, Transaction, TransferOperation, TRANSFER_OPERATION_ID};
use crate::ledger::{AssetAmount, ObjectId};

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::with_capacity(128) }
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    // unsigned LEB128
    fn varint(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    // Typed ids only carry their instance on the wire.
    fn object_id(&mut self, id: ObjectId) {
        self.varint(id.instance);
    }

    fn asset(&mut self, asset: &AssetAmount) {
        self.i64(asset.amount);
        self.object_id(asset.asset_id);
    }

    fn transfer(&mut self, op: &TransferOperation) {
        self.asset(&op.fee);
        self.object_id(op.from);
        self.object_id(op.to);
        self.asset(&op.amount);
        // memo: none
        self.buf.push(0);
        self.varint(op.extensions.len() as u64);
    }

    fn operation(&mut self, op: &Operation) {
        match op {
            Operation::Transfer(transfer) => {
                self.varint(u64::from(TRANSFER_OPERATION_ID));
                self.transfer(transfer);
            }
        }
    }
}

/// Serializes the unsigned part of `tx`.
pub fn serialize_transaction(tx: &Transaction) -> Vec<u8> {
    let mut w = Writer::new();
    w.u16(tx.ref_block_num);
    w.u32(tx.ref_block_prefix);
    w.u32(tx.expiration.and_utc().timestamp() as u32);

    w.varint(tx.operations.len() as u64);
    for op in &tx.operations {
        w.operation(op);
    }

    w.varint(tx.extensions.len() as u64);
    w.buf
}
