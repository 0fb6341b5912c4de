//! End-to-end validation cycles against an in-memory network.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{lotl, trust_list, Signer, StubFetcher, LOTL_URL, OJ_URL};
use std::sync::Arc;
use trustlist_registry::cert::KeyStoreCertificateSource;
use trustlist_registry::tsl::{
    CycleFailure, CycleStatus, ListFailure, ListOutcome, LotlDescriptor, PivotError,
    TlValidationJob, TrustListDescriptor,
};
use url::Url;

const TERRITORIES: [&str; 5] = ["AT", "BE", "CZ", "DE", "ES"];

fn member_url(territory: &str) -> String {
    format!("https://tl.example.org/{}.json", territory.to_lowercase())
}

fn pivot_url(n: usize) -> String {
    format!("https://lotl.example.org/pivot-{n}.json")
}

fn descriptor(anchor: &Signer) -> LotlDescriptor {
    LotlDescriptor::new(
        Url::parse(LOTL_URL).unwrap(),
        KeyStoreCertificateSource::new([anchor.certificate.clone()]),
    )
    .with_official_journal(Url::parse(OJ_URL).unwrap())
}

fn job(lotl: LotlDescriptor, fetcher: &Arc<StubFetcher>, dir: &tempfile::TempDir) -> TlValidationJob {
    TlValidationJob::builder()
        .lotl(lotl)
        .file_cache(dir.path(), fetcher.clone())
        .build()
        .unwrap()
}

/// A LOTL signed by `anchor` pointing at five member lists, each with two
/// granted service certificates.
struct FiveLists {
    anchor: Signer,
    fetcher: Arc<StubFetcher>,
}

impl FiveLists {
    fn new() -> Self {
        let anchor = Signer::new("LOTL Signer");
        let signers: Vec<_> = TERRITORIES
            .iter()
            .map(|t| Signer::new(&format!("{t} TL Signer")))
            .collect();
        let fetcher = Arc::new(StubFetcher::default());

        let urls: Vec<_> = TERRITORIES.iter().map(|t| member_url(t)).collect();
        let members: Vec<_> = TERRITORIES
            .iter()
            .zip(&urls)
            .zip(&signers)
            .map(|((t, url), s)| (*t, url.as_str(), &s.certificate))
            .collect();
        fetcher.serve(
            LOTL_URL,
            anchor.seal(&lotl(&[&anchor.certificate], &members, &[], true)),
        );

        for (territory, signer) in TERRITORIES.iter().zip(&signers) {
            let ca_1 = Signer::new(&format!("{territory} CA 1"));
            let ca_2 = Signer::new(&format!("{territory} CA 2"));
            fetcher.serve(
                &member_url(territory),
                signer.seal(&trust_list(territory, &[&ca_1.certificate, &ca_2.certificate])),
            );
        }

        Self { anchor, fetcher }
    }
}

#[tokio::test]
async fn test_five_lists_with_one_bad_signature() {
    let fixture = FiveLists::new();
    let rogue = Signer::new("Rogue");
    let rogue_ca = Signer::new("Rogue CA");
    fixture.fetcher.serve(
        &member_url("CZ"),
        rogue.seal(&trust_list("CZ", &[&rogue_ca.certificate])),
    );
    let dir = tempfile::tempdir().unwrap();
    let job = job(descriptor(&fixture.anchor), &fixture.fetcher, &dir);

    let result = job.run_cycle().await.unwrap();

    assert!(result.is_published());
    assert_eq!(result.outcomes().len(), 5);
    let failed: Vec<_> = result.failed_lists().cloned().collect();
    assert_eq!(failed, vec![Url::parse(&member_url("CZ")).unwrap()]);
    assert!(matches!(
        result.outcome(&failed[0]),
        Some(ListOutcome::Failed {
            failure: ListFailure::Signature(_),
            ..
        })
    ));

    let snapshot = job.aggregate().current_anchors();
    assert_eq!(snapshot.version(), 1);
    assert_eq!(snapshot.len(), 8);
    assert_eq!(snapshot.entries_for_territory("CZ").count(), 0);
    assert!(!job.aggregate().contains_public_key(rogue_ca.certificate.public_key_der()));
    for territory in ["AT", "BE", "DE", "ES"] {
        assert_eq!(snapshot.entries_for_territory(territory).count(), 2);
    }
}

#[tokio::test]
async fn test_unreachable_member_list_is_excluded() {
    let fixture = FiveLists::new();
    fixture.fetcher.fail(&member_url("DE"));
    let dir = tempfile::tempdir().unwrap();
    let job = job(descriptor(&fixture.anchor), &fixture.fetcher, &dir);

    let result = job.run_cycle().await.unwrap();

    assert!(matches!(
        result.outcome(&Url::parse(&member_url("DE")).unwrap()),
        Some(ListOutcome::Failed {
            failure: ListFailure::Unavailable(_),
            ..
        })
    ));
    assert_eq!(job.aggregate().current_anchors().len(), 8);
}

#[tokio::test]
async fn test_offline_cache_serves_lists_when_network_is_down() {
    let fixture = FiveLists::new();
    let dir = tempfile::tempdir().unwrap();
    job(descriptor(&fixture.anchor), &fixture.fetcher, &dir)
        .run_cycle()
        .await
        .unwrap();

    // A fresh job sharing the cache directory, with every fetch failing.
    let offline_network = Arc::new(StubFetcher::default());
    for url in std::iter::once(LOTL_URL.to_owned()).chain(TERRITORIES.iter().map(|t| member_url(t))) {
        offline_network.fail(&url);
    }
    let restarted = job(descriptor(&fixture.anchor), &offline_network, &dir);

    let result = restarted.run_cycle().await.unwrap();

    assert!(result.is_published());
    assert_eq!(result.failed_lists().count(), 0);
    assert_eq!(restarted.aggregate().current_anchors().len(), 10);
}

#[tokio::test]
async fn test_lotl_signed_by_unknown_key_fails_closed() {
    let fixture = FiveLists::new();
    let dir = tempfile::tempdir().unwrap();
    let job = job(descriptor(&fixture.anchor), &fixture.fetcher, &dir);
    job.run_cycle().await.unwrap();

    let impostor = Signer::new("Impostor");
    fixture.fetcher.serve(
        LOTL_URL,
        impostor.seal(&lotl(&[&impostor.certificate], &[], &[], true)),
    );
    let result = job.run_cycle().await.unwrap();

    assert!(matches!(
        result.status(),
        CycleStatus::FailedClosed(CycleFailure::Pivot(PivotError::AnchorNotReached { .. }))
    ));
    assert!(result.outcomes().is_empty());
    assert_eq!(job.aggregate().version(), 1);
    assert_eq!(job.aggregate().current_anchors().len(), 10);
}

/// Anchor A (in the key store) signed pivot-2 announcing B; B signed pivot-1
/// announcing C; C signs the current LOTL.
struct PivotChain {
    anchor: Signer,
    fetcher: Arc<StubFetcher>,
}

impl PivotChain {
    fn new() -> Self {
        let anchor = Signer::new("LOTL Signer 2019");
        let intermediate = Signer::new("LOTL Signer 2021");
        let current_signer = Signer::new("LOTL Signer 2023");
        let member = Signer::new("BE TL Signer");
        let fetcher = Arc::new(StubFetcher::default());

        fetcher.serve(
            &pivot_url(2),
            anchor.seal(&lotl(&[&intermediate.certificate], &[], &[], true)),
        );
        fetcher.serve(
            &pivot_url(1),
            intermediate.seal(&lotl(&[&current_signer.certificate], &[], &[], false)),
        );
        fetcher.serve(
            LOTL_URL,
            current_signer.seal(&lotl(
                &[&current_signer.certificate],
                &[("BE", member_url("BE").as_str(), &member.certificate)],
                &[pivot_url(1).as_str(), pivot_url(2).as_str()],
                false,
            )),
        );
        let ca = Signer::new("BE CA");
        fetcher.serve(&member_url("BE"), member.seal(&trust_list("BE", &[&ca.certificate])));

        Self { anchor, fetcher }
    }
}

#[tokio::test]
async fn test_pivot_chain_roots_rotated_lotl() {
    let chain = PivotChain::new();
    let dir = tempfile::tempdir().unwrap();
    let job = job(descriptor(&chain.anchor), &chain.fetcher, &dir);

    let result = job.run_cycle().await.unwrap();

    assert!(result.is_published(), "{:?}", result.status());
    assert_eq!(job.aggregate().current_anchors().len(), 1);
}

#[tokio::test]
async fn test_pivot_chain_break_fails_closed() {
    let chain = PivotChain::new();
    let dir = tempfile::tempdir().unwrap();
    let job = job(descriptor(&chain.anchor), &chain.fetcher, &dir);
    assert!(job.run_cycle().await.unwrap().is_published());
    let published = job.aggregate().current_anchors();

    // pivot-1 re-issued announcing a key that did not sign the current LOTL.
    let other = Signer::new("Unrelated");
    let intermediate = Signer::new("LOTL Signer 2021");
    chain.fetcher.serve(
        &pivot_url(1),
        intermediate.seal(&lotl(&[&other.certificate], &[], &[], false)),
    );
    let result = job.run_cycle().await.unwrap();

    match result.status() {
        CycleStatus::FailedClosed(CycleFailure::Pivot(PivotError::ChainBroken { url, subject })) => {
            assert_eq!(url.as_str(), pivot_url(1));
            assert!(subject.contains("LOTL Signer 2023"), "{subject}");
        }
        other => panic!("unexpected status: {other:?}"),
    }
    let current = job.aggregate().current_anchors();
    assert_eq!(current.version(), 1);
    assert_eq!(current.version(), published.version());
    assert_eq!(current.entries(), published.entries());
    assert_eq!(current.len(), 1);
}

#[tokio::test]
async fn test_manual_descriptor_overrides_lotl_pointer() {
    let chain = PivotChain::new();
    // The manual descriptor expects a different signer, so BE is rejected.
    let expected = Signer::new("BE TL Signer (pinned)");
    let dir = tempfile::tempdir().unwrap();
    let job = TlValidationJob::builder()
        .lotl(descriptor(&chain.anchor))
        .trusted_list(TrustListDescriptor::new(
            Url::parse(&member_url("BE")).unwrap(),
            "BE",
            [expected.certificate.clone()],
        ))
        .file_cache(dir.path(), chain.fetcher.clone())
        .build()
        .unwrap();

    let result = job.run_cycle().await.unwrap();

    assert_eq!(result.outcomes().len(), 1);
    assert!(matches!(
        result.outcome(&Url::parse(&member_url("BE")).unwrap()),
        Some(ListOutcome::Failed {
            failure: ListFailure::Signature(_),
            ..
        })
    ));
}
