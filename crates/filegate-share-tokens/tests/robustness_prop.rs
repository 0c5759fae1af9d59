use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use filegate_share_tokens::{ShareMode, ShareTokenService, ValidateError};
use proptest::prelude::*;

const SECRET: &[u8] = b"prop-test-secret";
const NOW: i64 = 1_700_000_000;

fn scope_segment() -> impl Strategy<Value = String> {
    proptest::collection::vec(proptest::char::range('a', 'z'), 1..=12)
        .prop_map(|chars| chars.into_iter().collect())
}

fn scope_path() -> impl Strategy<Value = String> {
    proptest::collection::vec(scope_segment(), 1..=4).prop_map(|segs| segs.join("/"))
}

fn token_strings() -> impl Strategy<Value = String> {
    // Arbitrary strings plus token-shaped inputs with extra dots and long
    // segments.
    prop_oneof![
        10 => ".*",
        2 => proptest::collection::vec(any::<u8>(), 0..=16_000)
            .prop_map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
        3 => (
            proptest::collection::vec(0u8..=127u8, 0..=2_000),
            proptest::collection::vec(0u8..=127u8, 0..=2_000),
            proptest::collection::vec(0u8..=127u8, 0..=2_000),
        )
            .prop_map(|(a, b, c)| {
                let part = |bytes: Vec<u8>| bytes.into_iter().map(|b| b as char).collect::<String>();
                format!("{}.{}.{}", part(a), part(b), part(c))
            }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        rng_algorithm: proptest::test_runner::RngAlgorithm::ChaCha,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0x51_6A_7E),
        .. ProptestConfig::default()
    })]

    #[test]
    fn validate_never_panics(token in token_strings()) {
        let svc = ShareTokenService::new(SECRET);
        let res = std::panic::catch_unwind(|| svc.validate(&token, NOW));
        prop_assert!(res.is_ok(), "validate panicked (len={})", token.len());
    }

    #[test]
    fn minted_tokens_validate(
        scope in scope_path(),
        ttl in 0i64..=4_000_000_000i64,
        directory in any::<bool>(),
        one_time in any::<bool>(),
    ) {
        let svc = ShareTokenService::new(SECRET);
        let mode = if directory { ShareMode::Directory } else { ShareMode::File };
        let token = svc.mint(mode, &scope, NOW + ttl, one_time).expect("mint");
        let grant = svc.validate(&token, NOW).expect("freshly minted token must validate");
        prop_assert_eq!(grant.mode, mode);
        prop_assert_eq!(grant.scope_path, scope);
        prop_assert_eq!(grant.expires_at_unix, NOW + ttl);
        prop_assert_eq!(grant.is_one_time, one_time);
        prop_assert_eq!(grant.nonce.is_empty(), !one_time);
    }

    // Flipping any single bit of the signature must reject the token, for
    // every payload.
    #[test]
    fn any_signature_bit_flip_is_rejected(
        scope in scope_path(),
        one_time in any::<bool>(),
        bit in 0usize..(32 * 8),
    ) {
        let svc = ShareTokenService::new(SECRET);
        let token = svc.mint(ShareMode::Directory, &scope, NOW + 3600, one_time).expect("mint");
        let (payload_b64, sig_b64) = token.split_once('.').expect("two-part token");

        let mut sig = URL_SAFE_NO_PAD.decode(sig_b64).expect("decode sig");
        sig[bit / 8] ^= 1 << (bit % 8);
        let tampered = format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(&sig));

        prop_assert_eq!(
            svc.validate(&tampered, NOW),
            Err(ValidateError::SignatureMismatch)
        );
    }
}

#[test]
fn extremely_long_inputs_do_not_panic() {
    let svc = ShareTokenService::new(SECRET);
    let seg = "x".repeat(200_000);
    let token = format!("{seg}.{seg}.{seg}");
    assert_eq!(svc.validate(&token, NOW), Err(ValidateError::Malformed));
}
