//! Descriptors of the lists a validation job processes, and the predicates
//! deciding which announcements and services are accepted.

use super::document::{SignedTrustList, TrustService};
use crate::cert::{Certificate, KeyStoreCertificateSource};
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;
use url::Url;

/// Territory code of the European list of trusted lists.
pub const DEFAULT_LOTL_TERRITORY: &str = "EU";

/// Service status URI of a granted (qualified) trust service.
pub const SERVICE_STATUS_GRANTED: &str = "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/granted";

// Statuses that meant "active" before the eIDAS status scheme.
const LEGACY_ACTIVE_STATUSES: &[&str] = &[
    "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/undersupervision",
    "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/supervisionincessation",
    "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/accredited",
    "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/setbynationallaw",
];

/// Decides whether a list anchored in the key store is an authentic announcement.
pub trait AnnouncementPredicate: Debug + Send + Sync + 'static {
    /// Returns `true` if `list` is accepted as announced.
    fn accepts(&self, list: &SignedTrustList) -> bool;
}

/// Accepts lists that reference the Official Journal publication in their
/// scheme information URIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfficialJournalSchemeInformationUri {
    official_journal: Url,
}

impl OfficialJournalSchemeInformationUri {
    /// Creates the predicate for the given Official Journal URL.
    pub fn new(official_journal: Url) -> Self {
        Self { official_journal }
    }

    /// The expected Official Journal URL.
    pub fn url(&self) -> &Url {
        &self.official_journal
    }
}

impl AnnouncementPredicate for OfficialJournalSchemeInformationUri {
    fn accepts(&self, list: &SignedTrustList) -> bool {
        list.scheme_information_uris()
            .iter()
            .any(|uri| uri == &self.official_journal)
    }
}

/// Accepts every announcement. Trust then rests on the key store alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyAnnouncement;

impl AnnouncementPredicate for AnyAnnouncement {
    fn accepts(&self, _list: &SignedTrustList) -> bool {
        true
    }
}

/// Selects the trust services whose certificates enter the aggregate.
pub trait ServicePredicate: Debug + Send + Sync + 'static {
    /// Returns `true` if the service's certificates are trusted.
    fn accepts(&self, service: &TrustService) -> bool;
}

/// Accepts granted services and their pre-eIDAS equivalents.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantedTrustService;

impl ServicePredicate for GrantedTrustService {
    fn accepts(&self, service: &TrustService) -> bool {
        service.status == SERVICE_STATUS_GRANTED
            || LEGACY_ACTIVE_STATUSES.contains(&service.status.as_str())
    }
}

/// Accepts every service regardless of status.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllServices;

impl ServicePredicate for AcceptAllServices {
    fn accepts(&self, _service: &TrustService) -> bool {
        true
    }
}

/// A trust list to fetch and validate. Immutable once built.
#[derive(Debug, Clone)]
pub struct TrustListDescriptor {
    url: Url,
    territory: String,
    signers: BTreeSet<Certificate>,
    service_predicate: Arc<dyn ServicePredicate>,
}

impl TrustListDescriptor {
    /// Describes the list at `url`, expected to be signed by one of `signers`.
    pub fn new(
        url: Url,
        territory: impl Into<String>,
        signers: impl IntoIterator<Item = Certificate>,
    ) -> Self {
        Self {
            url,
            territory: territory.into(),
            signers: signers.into_iter().collect(),
            service_predicate: Arc::new(GrantedTrustService),
        }
    }

    /// Replaces the service predicate ([`GrantedTrustService`] by default).
    #[must_use]
    pub fn with_service_predicate(mut self, predicate: Arc<dyn ServicePredicate>) -> Self {
        self.service_predicate = predicate;
        self
    }

    /// Location of the list.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Expected territory.
    pub fn territory(&self) -> &str {
        &self.territory
    }

    /// Certificates allowed to sign the list.
    pub fn signers(&self) -> &BTreeSet<Certificate> {
        &self.signers
    }

    /// The service predicate.
    pub fn service_predicate(&self) -> &dyn ServicePredicate {
        self.service_predicate.as_ref()
    }
}

/// The list of trusted lists to root the job in.
#[derive(Debug, Clone)]
pub struct LotlDescriptor {
    url: Url,
    territory: String,
    anchors: KeyStoreCertificateSource,
    announcement: Arc<dyn AnnouncementPredicate>,
    pivot_support: bool,
    service_predicate: Arc<dyn ServicePredicate>,
}

impl LotlDescriptor {
    /// Describes the list at `url`, anchored in `anchors`.
    ///
    /// Defaults: territory `EU`, pivot support enabled, every announcement
    /// accepted, [`GrantedTrustService`] for member lists.
    pub fn new(url: Url, anchors: KeyStoreCertificateSource) -> Self {
        Self {
            url,
            territory: DEFAULT_LOTL_TERRITORY.to_owned(),
            anchors,
            announcement: Arc::new(AnyAnnouncement),
            pivot_support: true,
            service_predicate: Arc::new(GrantedTrustService),
        }
    }

    /// Sets the territory code of the list.
    #[must_use]
    pub fn with_territory(mut self, territory: impl Into<String>) -> Self {
        self.territory = territory.into();
        self
    }

    /// Requires anchored lists to reference `official_journal`.
    #[must_use]
    pub fn with_official_journal(self, official_journal: Url) -> Self {
        self.with_announcement_predicate(Arc::new(OfficialJournalSchemeInformationUri::new(
            official_journal,
        )))
    }

    /// Replaces the announcement predicate.
    #[must_use]
    pub fn with_announcement_predicate(mut self, predicate: Arc<dyn AnnouncementPredicate>) -> Self {
        self.announcement = predicate;
        self
    }

    /// Enables or disables pivot resolution.
    #[must_use]
    pub fn with_pivot_support(mut self, enabled: bool) -> Self {
        self.pivot_support = enabled;
        self
    }

    /// Replaces the service predicate applied to member lists.
    #[must_use]
    pub fn with_service_predicate(mut self, predicate: Arc<dyn ServicePredicate>) -> Self {
        self.service_predicate = predicate;
        self
    }

    /// Location of the list.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Territory code.
    pub fn territory(&self) -> &str {
        &self.territory
    }

    /// Out-of-band trust anchors.
    pub fn anchors(&self) -> &KeyStoreCertificateSource {
        &self.anchors
    }

    /// Whether pivots are followed.
    pub fn pivot_support(&self) -> bool {
        self.pivot_support
    }

    /// Returns `true` if `list` is signed by an anchor and its announcement is accepted.
    pub fn anchor_accepts(&self, list: &SignedTrustList) -> bool {
        self.anchors.contains(list.signer()) && self.announcement.accepts(list)
    }

    /// Descriptors for the member lists the top-level list points to.
    pub fn member_descriptors(&self, lotl: &SignedTrustList) -> Vec<TrustListDescriptor> {
        lotl.member_pointers()
            .map(|p| {
                TrustListDescriptor::new(
                    p.location.clone(),
                    p.territory.clone(),
                    p.signing_certificates.iter().cloned(),
                )
                .with_service_predicate(Arc::clone(&self.service_predicate))
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_util::{lotl_content, mint_certificate, seal, OJ_URL};

    fn service(status: &str) -> TrustService {
        TrustService {
            name: "CA/QC".to_owned(),
            provider: "QTSP".to_owned(),
            service_type: "http://uri.etsi.org/TrstSvc/Svctype/CA/QC".to_owned(),
            status: status.to_owned(),
            certificates: Vec::new(),
        }
    }

    #[test]
    fn test_granted_trust_service() {
        assert!(GrantedTrustService.accepts(&service(SERVICE_STATUS_GRANTED)));
        assert!(GrantedTrustService.accepts(&service(
            "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/accredited"
        )));
        assert!(!GrantedTrustService.accepts(&service(
            "http://uri.etsi.org/TrstSvc/TrustedList/Svcstatus/withdrawn"
        )));
        assert!(AcceptAllServices.accepts(&service("anything")));
    }

    #[test]
    fn test_anchor_requires_key_store_and_official_journal() {
        let (anchor, key) = mint_certificate("LOTL Signer");
        let lotl = SignedTrustList::parse(&seal(&lotl_content(&[&anchor], &[], &[]), &anchor, &key)).unwrap();
        let url = Url::parse("https://lotl.example.org/eu.json").unwrap();

        let accepted = LotlDescriptor::new(url.clone(), KeyStoreCertificateSource::new([anchor.clone()]))
            .with_official_journal(Url::parse(OJ_URL).unwrap());
        assert!(accepted.anchor_accepts(&lotl));

        let other_journal = LotlDescriptor::new(url.clone(), KeyStoreCertificateSource::new([anchor]))
            .with_official_journal(Url::parse("https://eur-lex.example.org/oj/other").unwrap());
        assert!(!other_journal.anchor_accepts(&lotl));

        let (stranger, _) = mint_certificate("Stranger");
        let wrong_anchor = LotlDescriptor::new(url, KeyStoreCertificateSource::new([stranger]));
        assert!(!wrong_anchor.anchor_accepts(&lotl));
    }

    #[test]
    fn test_member_descriptors_skip_own_territory() {
        let (anchor, key) = mint_certificate("LOTL Signer");
        let (be, _) = mint_certificate("BE TL Signer");
        let (fr, _) = mint_certificate("FR TL Signer");
        let content = lotl_content(
            &[&anchor],
            &[
                ("BE", "https://tl.example.org/be.json", &be),
                ("FR", "https://tl.example.org/fr.json", &fr),
            ],
            &[],
        );
        let lotl = SignedTrustList::parse(&seal(&content, &anchor, &key)).unwrap();
        let descriptor = LotlDescriptor::new(
            Url::parse("https://lotl.example.org/eu.json").unwrap(),
            KeyStoreCertificateSource::new([anchor]),
        );

        let members = descriptor.member_descriptors(&lotl);

        assert_eq!(members.len(), 2);
        assert_eq!(members[0].territory(), "BE");
        assert_eq!(members[0].signers(), &BTreeSet::from([be]));
        assert_eq!(members[1].url().as_str(), "https://tl.example.org/fr.json");
    }
}
