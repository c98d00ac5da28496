//! Campaigns and the lookup interface the match engine resolves beacons through.
//!
//! The engine only knows the [`CampaignResolver`] trait. [`StaticResolver`] is the
//! in-memory implementation used by the binary, filled from `--campaign` flags
//! and/or a JSON catalogue file.

use crate::identifier::{CanonicalIdentifier, normalize};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use thiserror::Error;

/// A marketing campaign bound to one beacon identifier.
///
/// Deserializes from both the field names used here and the legacy catalogue
/// names (`uuid`, `isActive`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Campaign {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub website: String,
    #[serde(alias = "uuid")]
    pub identifier: String,
    #[serde(alias = "isActive", default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Errors a resolver may report. The match engine treats every one of them as "not found".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// The backing store could not be reached
    #[error("Campaign store unavailable: {0}")]
    Unavailable(String),
    /// The backing store answered with an error
    #[error("Campaign store error: {0}")]
    Backend(String),
}

/// Future returned by [`CampaignResolver::find_active`].
pub type ResolveFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<Campaign>, ResolveError>> + Send + 'a>>;

/// Lookup of the active campaign bound to an identifier.
///
/// Implementations may perform network I/O; the engine never holds a lock while
/// awaiting the returned future.
pub trait CampaignResolver: Send + Sync {
    fn find_active<'a>(&'a self, id: &'a CanonicalIdentifier) -> ResolveFuture<'a>;
}

/// In-memory campaign catalogue keyed by normalized identifier.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    campaigns: HashMap<CanonicalIdentifier, Vec<Campaign>>,
}

impl StaticResolver {
    pub fn new(campaigns: impl IntoIterator<Item = Campaign>) -> Self {
        let mut resolver = Self::default();
        for campaign in campaigns {
            resolver.insert(campaign);
        }
        resolver
    }

    /// Add a campaign. Campaigns without a usable identifier are ignored.
    pub fn insert(&mut self, campaign: Campaign) {
        if let Some(id) = CanonicalIdentifier::new(&campaign.identifier) {
            self.campaigns.entry(id).or_default().push(campaign);
        }
    }

    /// Number of campaigns in the catalogue, active or not.
    pub fn len(&self) -> usize {
        self.campaigns.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }

    /// First active campaign registered for `id`.
    pub fn lookup(&self, id: &CanonicalIdentifier) -> Option<&Campaign> {
        self.campaigns.get(id)?.iter().find(|c| c.active)
    }
}

impl CampaignResolver for StaticResolver {
    fn find_active<'a>(&'a self, id: &'a CanonicalIdentifier) -> ResolveFuture<'a> {
        let found = self.lookup(id).cloned();
        Box::pin(async move { Ok(found) })
    }
}

/// Parse a campaign from a string in the format "UUID=NAME".
///
/// The campaign id is the normalized identifier; description and website are empty.
///
/// # Example
/// ```
/// use beacon_campaign_listener::campaign::parse_campaign;
///
/// let campaign = parse_campaign("E2C56DB5-DFFB-48D2-B060-D0F5A71096E0=Demo").unwrap();
/// assert_eq!(campaign.identifier, "e2c56db5-dffb-48d2-b060-d0f5a71096e0");
/// assert_eq!(campaign.name, "Demo");
/// assert!(campaign.active);
/// ```
pub fn parse_campaign(src: &str) -> Result<Campaign, String> {
    let (identifier, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid campaign: expected format UUID=NAME".to_string())?;

    let identifier = normalize(identifier);
    if identifier.is_empty() {
        return Err("invalid campaign: empty UUID".into());
    }
    let name = name.trim();
    if name.is_empty() {
        return Err("invalid campaign: empty name".into());
    }

    Ok(Campaign {
        id: identifier.clone(),
        name: name.to_string(),
        description: String::new(),
        website: String::new(),
        identifier,
        active: true,
    })
}

/// Errors returned when loading a campaign catalogue file.
#[derive(Error, Debug)]
pub enum CampaignFileError {
    #[error("failed to read campaign file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse campaign file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a JSON array of campaigns.
pub fn parse_campaigns_json(json: &str) -> Result<Vec<Campaign>, serde_json::Error> {
    serde_json::from_str(json)
}

/// Load a JSON array of campaigns from `path`.
pub fn load_campaigns(path: &Path) -> Result<Vec<Campaign>, CampaignFileError> {
    let display = path.display().to_string();
    let json = std::fs::read_to_string(path).map_err(|source| CampaignFileError::Io {
        path: display.clone(),
        source,
    })?;
    parse_campaigns_json(&json).map_err(|source| CampaignFileError::Json {
        path: display,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{DEMO_UUID, demo_campaign};

    fn demo_id() -> CanonicalIdentifier {
        DEMO_UUID.parse().unwrap()
    }

    #[test]
    fn test_parse_campaign_valid() {
        let campaign = parse_campaign("e2c56db5-dffb-48d2-b060-d0f5a71096e0=Demo").unwrap();
        assert_eq!(campaign.identifier, DEMO_UUID);
        assert_eq!(campaign.id, DEMO_UUID);
        assert_eq!(campaign.name, "Demo");
        assert!(campaign.active);
    }

    #[test]
    fn test_parse_campaign_with_spaces() {
        let campaign = parse_campaign(" E2C56DB5-DFFB-48D2-B060-D0F5A71096E0 =Summer Sale").unwrap();
        assert_eq!(campaign.identifier, DEMO_UUID);
        assert_eq!(campaign.name, "Summer Sale");
    }

    #[test]
    fn test_parse_campaign_invalid() {
        assert!(parse_campaign("no-equals-sign").is_err());
        assert!(parse_campaign("=Demo").is_err());
        assert!(parse_campaign("abc=  ").is_err());
    }

    #[test]
    fn test_lookup_normalizes_catalogue_identifiers() {
        let mut campaign = demo_campaign();
        campaign.identifier = format!("  {}  ", DEMO_UUID.to_uppercase());
        let resolver = StaticResolver::new([campaign]);
        assert_eq!(resolver.lookup(&demo_id()).unwrap().name, "Demo");
    }

    #[test]
    fn test_lookup_skips_inactive_campaigns() {
        let mut inactive = demo_campaign();
        inactive.name = "Old".to_string();
        inactive.active = false;
        let resolver = StaticResolver::new([inactive.clone()]);
        assert!(resolver.lookup(&demo_id()).is_none());

        let resolver = StaticResolver::new([inactive, demo_campaign()]);
        assert_eq!(resolver.lookup(&demo_id()).unwrap().name, "Demo");
    }

    #[test]
    fn test_first_active_campaign_wins() {
        let mut second = demo_campaign();
        second.name = "Second".to_string();
        let resolver = StaticResolver::new([demo_campaign(), second]);
        assert_eq!(resolver.lookup(&demo_id()).unwrap().name, "Demo");
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn test_campaign_without_identifier_is_ignored() {
        let mut campaign = demo_campaign();
        campaign.identifier = "   ".to_string();
        let resolver = StaticResolver::new([campaign]);
        assert!(resolver.is_empty());
    }

    #[tokio::test]
    async fn test_find_active_resolves_through_trait() {
        let resolver: Box<dyn CampaignResolver> = Box::new(StaticResolver::new([demo_campaign()]));
        let found = resolver.find_active(&demo_id()).await.unwrap();
        assert_eq!(found, Some(demo_campaign()));

        let other = CanonicalIdentifier::new("00000000-0000-0000-0000-000000000000").unwrap();
        assert_eq!(resolver.find_active(&other).await.unwrap(), None);
    }

    #[test]
    fn test_parse_campaigns_json_legacy_fields() {
        let json = r#"[
            {
                "id": "c1",
                "name": "Demo",
                "description": "Ten percent off",
                "website": "https://example.com",
                "uuid": "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0",
                "isActive": false
            },
            { "name": "Minimal", "identifier": "b9407f30-f5f8-466e-aff9-25556b57fe6d" }
        ]"#;
        let campaigns = parse_campaigns_json(json).unwrap();
        assert_eq!(campaigns.len(), 2);
        assert_eq!(campaigns[0].id, "c1");
        assert!(!campaigns[0].active);
        assert_eq!(campaigns[1].id, "");
        assert!(campaigns[1].active);
    }

    #[test]
    fn test_parse_campaigns_json_invalid() {
        assert!(parse_campaigns_json("{ not json").is_err());
        assert!(parse_campaigns_json(r#"[{ "name": "no identifier" }]"#).is_err());
    }

    #[test]
    fn test_load_campaigns_from_file() {
        let path = std::env::temp_dir().join(format!("campaigns-{}.json", std::process::id()));
        std::fs::write(&path, format!(r#"[{{ "name": "Demo", "uuid": "{DEMO_UUID}" }}]"#)).unwrap();

        let campaigns = load_campaigns(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(campaigns.len(), 1);
        assert_eq!(campaigns[0].identifier, DEMO_UUID);
    }

    #[test]
    fn test_load_campaigns_missing_file() {
        let err = load_campaigns(Path::new("/nonexistent/campaigns.json")).unwrap_err();
        assert!(matches!(err, CampaignFileError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/campaigns.json"));
    }

    #[test]
    fn test_resolve_error_display() {
        let err = ResolveError::Unavailable("timeout".to_string());
        assert_eq!(format!("{}", err), "Campaign store unavailable: timeout");
    }
}
