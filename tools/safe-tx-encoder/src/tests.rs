#[cfg(test)]
mod tests {
    use crate::aggregate::{AggregateError, SignatureAggregate};
    use crate::descriptor::{DescriptorError, TransactionDescriptor};
    use crate::digest::{
        eth_signed_message_hash, keccak256_bytes, safe_tx_hash, DOMAIN_TYPE, SAFE_TX_TYPE,
    };
    use crate::packing::pack_signatures;
    use crate::signature::{SafeSignature, SignatureError, SignatureKind, SIGNATURE_LEN};
    use crate::signer::LocalSigner;
    use alloy_primitives::{address, b256, Address, Bytes, B256, U256};
    use k256::ecdsa::SigningKey;
    use proptest::prelude::*;
    use safe_tx_types::{SafeDomain, SafeTx};

    const SAFE: Address = address!("5afe00000000000000000000000000000000cafe");
    const KEY1_ADDR: Address = address!("7e5f4552091a69125d5dfcb7b8c2659029395bdf");
    const KEY2_ADDR: Address = address!("2b5ad5c4795c026514f8317c7a215e218dccd6cf");
    const KEY3_ADDR: Address = address!("6813eb9362372eef6200f3b1dbc3f819671cba69");

    fn signer(seed: u64) -> LocalSigner {
        let key = SigningKey::from_slice(&U256::from(seed).to_be_bytes::<32>()).unwrap();
        LocalSigner::new(key)
    }

    fn domain() -> SafeDomain {
        SafeDomain::new(11_155_111, SAFE)
    }

    fn transfer(nonce: u64) -> SafeTx {
        SafeTx::call(
            KEY1_ADDR,
            U256::from(1_000_000_000_000_000u64),
            Bytes::new(),
            U256::from(nonce),
        )
    }

    #[test]
    fn test_type_hashes() {
        assert_eq!(
            keccak256_bytes(DOMAIN_TYPE),
            b256!("47e79534a245952e8b16893a336b85a3d9ea9fa8c573f3d803afb92a79469218")
        );
        assert_eq!(
            keccak256_bytes(SAFE_TX_TYPE),
            b256!("bb8310d486368db6bd6f849402fdd73ad53d316b5a4b2644ad6efe0f941286d8")
        );
    }

    #[test]
    fn test_safe_tx_hash_vectors() {
        assert_eq!(
            safe_tx_hash(&domain(), &transfer(7)),
            b256!("1e2f01c1244f61ecbecd6f9d60b142ca0249d2ef18357d6a0c96e6e9f292bcd2")
        );
        assert_eq!(
            safe_tx_hash(&domain(), &transfer(8)),
            b256!("7aac3f29ba4778f47640b6c46d1df176a7d34cb451121bfbb939d37f9fc1a9f9")
        );

        let call = SafeTx::call(
            KEY1_ADDR,
            U256::ZERO,
            Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]),
            U256::from(7u64),
        );
        assert_eq!(
            safe_tx_hash(&domain(), &call),
            b256!("b527843b81280b670d1889541a4766bd8e16f5f420330179706b814e8a9bd175")
        );
    }

    #[test]
    fn test_identifier_is_deterministic_and_domain_separated() {
        let a = TransactionDescriptor::new(domain(), transfer(7));
        let b = TransactionDescriptor::new(domain(), transfer(7));
        assert_eq!(a.safe_tx_hash(), b.safe_tx_hash());

        let other_chain = TransactionDescriptor::new(SafeDomain::new(1, SAFE), transfer(7));
        assert_ne!(a.safe_tx_hash(), other_chain.safe_tx_hash());
    }

    #[test]
    fn test_zero_target_requires_opt_in() {
        let mut tx = transfer(0);
        tx.to = Address::ZERO;
        assert_eq!(
            TransactionDescriptor::checked(domain(), tx.clone(), false),
            Err(DescriptorError::InvalidTarget)
        );
        assert!(TransactionDescriptor::checked(domain(), tx, true).is_ok());
    }

    #[test]
    fn test_from_reported_rejects_foreign_hash() {
        let err = TransactionDescriptor::from_reported(domain(), transfer(7), B256::ZERO)
            .unwrap_err();
        assert!(matches!(err, DescriptorError::IdentifierMismatch { .. }));
    }

    #[test]
    fn test_known_key_addresses() {
        assert_eq!(signer(1).address(), KEY1_ADDR);
        assert_eq!(signer(2).address(), KEY2_ADDR);
        assert_eq!(signer(3).address(), KEY3_ADDR);
        let from_hex = LocalSigner::from_hex(
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(from_hex.address(), KEY1_ADDR);
    }

    #[test]
    fn test_sign_then_recover() {
        let hash = safe_tx_hash(&domain(), &transfer(7));
        let sig = signer(2).sign_hash(hash).unwrap();
        assert_eq!(sig.kind(), Ok(SignatureKind::Ecdsa));
        assert!(sig.v() == 27 || sig.v() == 28);
        assert_eq!(sig.recover_signer(hash), Ok(KEY2_ADDR));

        let parsed = SafeSignature::from_hex(&sig.to_hex()).unwrap();
        assert_eq!(parsed, sig);
    }

    #[test]
    fn test_eth_sign_signature_recovers_with_prefix() {
        let hash = safe_tx_hash(&domain(), &transfer(7));
        let raw = signer(3).sign_hash(eth_signed_message_hash(hash)).unwrap();
        let bytes = raw.to_bytes();
        let mut shifted = bytes;
        shifted[64] += 4;
        let sig = SafeSignature::from_slice(&shifted).unwrap();
        assert_eq!(sig.kind(), Ok(SignatureKind::EthSign));
        assert_eq!(sig.recover_signer(hash), Ok(KEY3_ADDR));
    }

    #[test]
    fn test_high_s_signature_still_recovers() {
        let order = U256::from_str_radix(
            "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141",
            16,
        )
        .unwrap();
        let hash = safe_tx_hash(&domain(), &transfer(9));
        let bytes = signer(1).sign_hash(hash).unwrap().to_bytes();

        let s = U256::from_be_slice(&bytes[32..64]);
        let high_s = order - s;
        let mut flipped = bytes;
        flipped[32..64].copy_from_slice(&high_s.to_be_bytes::<32>());
        flipped[64] = if bytes[64] == 27 { 28 } else { 27 };

        let sig = SafeSignature::from_slice(&flipped).unwrap();
        assert_eq!(sig.recover_signer(hash), Ok(KEY1_ADDR));
    }

    #[test]
    fn test_approved_hash_signature() {
        let sig = SafeSignature::approved_hash(KEY3_ADDR);
        assert_eq!(sig.kind(), Ok(SignatureKind::ApprovedHash));
        assert_eq!(sig.recover_signer(B256::ZERO), Ok(KEY3_ADDR));
    }

    #[test]
    fn test_malformed_signatures() {
        assert_eq!(
            SafeSignature::from_slice(&[0u8; 64]),
            Err(SignatureError::InvalidLength(64))
        );
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes[64] = 5;
        let sig = SafeSignature::from_slice(&bytes).unwrap();
        assert_eq!(sig.kind(), Err(SignatureError::UnsupportedKind(5)));
        assert!(SafeSignature::from_hex("0xzz").is_err());
    }

    #[test]
    fn test_aggregate_same_signer_twice_keeps_one_entry() {
        let hash = safe_tx_hash(&domain(), &transfer(7));
        let mut agg = SignatureAggregate::new(hash, 2).unwrap();
        let owner = signer(1);

        assert_eq!(agg.add_signature(owner.sign_hash(hash).unwrap()), Ok(KEY1_ADDR));
        assert_eq!(agg.add_signature(owner.sign_hash(hash).unwrap()), Ok(KEY1_ADDR));
        assert_eq!(agg.signer_count(), 1);
        assert!(!agg.is_quorum_reached());

        agg.add_signature(signer(2).sign_hash(hash).unwrap()).unwrap();
        assert!(agg.is_quorum_reached());
        assert_eq!(agg.signers().collect::<Vec<_>>(), vec![KEY2_ADDR, KEY1_ADDR]);
    }

    #[test]
    fn test_aggregate_rejects_misattributed_signature() {
        let hash = safe_tx_hash(&domain(), &transfer(7));
        let mut agg = SignatureAggregate::new(hash, 1).unwrap();
        let sig = signer(1).sign_hash(hash).unwrap().to_bytes();

        let err = agg.add_reported(KEY2_ADDR, &sig).unwrap_err();
        assert_eq!(
            err,
            SignatureError::SignerMismatch {
                reported: KEY2_ADDR,
                recovered: KEY1_ADDR
            }
        );
        assert_eq!(agg.signer_count(), 0);
        assert_eq!(agg.add_reported(KEY1_ADDR, &sig), Ok(KEY1_ADDR));
    }

    #[test]
    fn test_aggregate_rejects_contract_signatures_and_zero_threshold() {
        assert_eq!(
            SignatureAggregate::new(B256::ZERO, 0),
            Err(AggregateError::ZeroThreshold)
        );
        let mut agg = SignatureAggregate::new(B256::ZERO, 1).unwrap();
        let contract = SafeSignature::from_parts(B256::ZERO, B256::ZERO, 0);
        assert_eq!(
            agg.add_signature(contract),
            Err(SignatureError::UnsupportedKind(0))
        );
    }

    #[test]
    fn test_aggregate_retain_and_rethreshold() {
        let hash = safe_tx_hash(&domain(), &transfer(7));
        let mut agg = SignatureAggregate::new(hash, 2).unwrap();
        for seed in 1..=3 {
            agg.add_signature(signer(seed).sign_hash(hash).unwrap()).unwrap();
        }
        let dropped = agg.retain_signers(|a| a != KEY3_ADDR);
        assert_eq!(dropped, vec![KEY3_ADDR]);
        assert!(agg.is_quorum_reached());
        agg.set_threshold(3).unwrap();
        assert!(!agg.is_quorum_reached());
    }

    #[test]
    fn test_pack_signatures_sorted_ascending() {
        let hash = safe_tx_hash(&domain(), &transfer(7));
        let entries: Vec<(Address, SafeSignature)> = (1..=3)
            .map(|seed| {
                let s = signer(seed);
                (s.address(), s.sign_hash(hash).unwrap())
            })
            .collect();

        let packed = pack_signatures(entries.clone());
        assert_eq!(packed.len(), 3 * SIGNATURE_LEN);

        let order: Vec<Address> = packed
            .chunks(SIGNATURE_LEN)
            .map(|chunk| {
                SafeSignature::from_slice(chunk)
                    .unwrap()
                    .recover_signer(hash)
                    .unwrap()
            })
            .collect();
        assert_eq!(order, vec![KEY2_ADDR, KEY3_ADDR, KEY1_ADDR]);

        let mut agg = SignatureAggregate::new(hash, 3).unwrap();
        for (_, sig) in entries.into_iter().rev() {
            agg.add_signature(sig).unwrap();
        }
        assert_eq!(agg.packed(), packed);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn packing_ignores_input_order(
            seeds in proptest::collection::btree_set(1u64..10_000, 1..6),
            rotate in 0usize..6,
        ) {
            let hash = safe_tx_hash(&domain(), &transfer(1));
            let mut entries: Vec<(Address, SafeSignature)> = seeds
                .iter()
                .map(|seed| {
                    let s = signer(*seed);
                    (s.address(), s.sign_hash(hash).unwrap())
                })
                .collect();
            let forward = pack_signatures(entries.clone());
            let len = entries.len();
            entries.rotate_left(rotate % len);
            entries.reverse();
            prop_assert_eq!(pack_signatures(entries), forward);
        }

        #[test]
        fn quorum_survives_supersets(
            seeds in proptest::collection::btree_set(1u64..10_000, 1..6),
            extra in proptest::collection::btree_set(10_000u64..20_000, 0..4),
            threshold in 1u64..6,
        ) {
            let hash = safe_tx_hash(&domain(), &transfer(2));
            let mut agg = SignatureAggregate::new(hash, threshold).unwrap();
            for seed in &seeds {
                agg.add_signature(signer(*seed).sign_hash(hash).unwrap()).unwrap();
            }
            let before = agg.is_quorum_reached();
            for seed in &extra {
                agg.add_signature(signer(*seed).sign_hash(hash).unwrap()).unwrap();
            }
            if before {
                prop_assert!(agg.is_quorum_reached());
            }
        }
    }
}
