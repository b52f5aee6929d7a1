//! Curated category pages and the matching of free-form listing categories to them.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use farmdir_core::normalize::to_slug;
use farmdir_core::StoredListing;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const FEATURED_PER_CATEGORY: usize = 3;
const BLURB_CHARS: usize = 120;
const BLURB_FALLBACK: &str = "Farm description coming soon...";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faq {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuratedCategory {
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub intro: String,
    #[serde(default)]
    pub faqs: Vec<Faq>,
}

pub type CuratedCategories = BTreeMap<String, CuratedCategory>;

pub fn parse_curated(text: &str) -> Result<CuratedCategories> {
    let mut parsed: CuratedCategories = serde_yaml::from_str(text).context("parsing curated categories")?;
    for (key, category) in parsed.iter_mut() {
        if category.slug.trim().is_empty() {
            category.slug = key.clone();
        }
    }
    Ok(parsed)
}

pub fn load_curated(path: impl AsRef<Path>) -> Result<CuratedCategories> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_curated(&text).with_context(|| format!("parsing {}", path.display()))
}

fn significant_words(text: &str) -> Vec<&str> {
    text.split_whitespace().filter(|w| w.chars().count() > 2).collect()
}

/// Whether a listing's free-form category belongs to a curated category.
pub fn matches_category(curated: &CuratedCategory, listing_category: &str) -> bool {
    let curated_name = curated.name.trim().to_lowercase();
    let candidate = listing_category.trim().to_lowercase();
    if candidate.is_empty() {
        return false;
    }

    if curated_name == candidate {
        return true;
    }
    if curated_name.contains(&candidate) || candidate.contains(&curated_name) {
        return true;
    }
    if curated.slug == to_slug(listing_category) {
        return true;
    }

    let curated_words = significant_words(&curated_name);
    let candidate_words = significant_words(&candidate);
    let main_word_matches = match (curated_words.first(), candidate_words.first()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    let common = curated_words
        .iter()
        .filter(|w| candidate_words.contains(w))
        .count();
    main_word_matches && common >= 2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryListing {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub url: String,
    pub blurb: String,
    pub city: Option<String>,
    pub region: Option<String>,
    pub featured: bool,
}

impl CategoryListing {
    fn from_listing(listing: &StoredListing) -> Self {
        let blurb = match listing.row.description.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(text) => format!("{}...", text.chars().take(BLURB_CHARS).collect::<String>()),
            None => BLURB_FALLBACK.to_string(),
        };
        Self {
            id: listing.row.external_id.clone(),
            name: listing.row.name.clone(),
            slug: listing.row.slug.clone(),
            url: listing.url_path(),
            blurb,
            city: listing.row.city.clone(),
            region: listing.row.region.clone(),
            featured: listing.moderation.featured,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub slug: String,
    pub name: String,
    pub total_listings: usize,
    pub description: String,
    pub intro: String,
    pub faqs: Vec<Faq>,
    pub featured_listings: Vec<CategoryListing>,
}

pub fn group_by_category(curated: &CuratedCategories, listings: &[StoredListing]) -> Vec<CategorySummary> {
    let mut members: BTreeMap<&str, Vec<CategoryListing>> = BTreeMap::new();

    for listing in listings.iter().filter(|l| l.moderation.active) {
        for category in listing.row.category_list() {
            let Some((key, _)) = curated.iter().find(|(_, c)| matches_category(c, &category)) else {
                debug!(category = %category, listing = %listing.row.external_id, "no curated category match");
                continue;
            };
            let bucket = members.entry(key.as_str()).or_default();
            if !bucket.iter().any(|m| m.id == listing.row.external_id) {
                bucket.push(CategoryListing::from_listing(listing));
            }
        }
    }

    let mut out = curated
        .iter()
        .map(|(key, category)| {
            let mut bucket = members.remove(key.as_str()).unwrap_or_default();
            bucket.sort_by(|a, b| {
                b.featured
                    .cmp(&a.featured)
                    .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            });
            let total_listings = bucket.len();
            bucket.truncate(FEATURED_PER_CATEGORY);
            CategorySummary {
                slug: category.slug.clone(),
                name: category.name.clone(),
                total_listings,
                description: category.description.clone(),
                intro: category.intro.clone(),
                faqs: category.faqs.clone(),
                featured_listings: bucket,
            }
        })
        .collect::<Vec<_>>();

    out.sort_by(|a, b| b.total_listings.cmp(&a.total_listings));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmdir_core::{ListingRow, ModerationFlags};

    const CURATED: &str = r#"
apple-orchard:
  name: Apple Orchards
  slug: apple-orchard
  description: Pick your own apples.
  intro: Orchards.
  faqs:
    - question: When?
      answer: September.
pumpkin-patch:
  name: Pumpkin Patches
  description: Pumpkins.
christmas-trees:
  name: Christmas Tree Farms
"#;

    fn listing(id: &str, name: &str, categories: &str, featured: bool) -> StoredListing {
        StoredListing {
            id: uuid::Uuid::new_v4(),
            row: ListingRow {
                external_id: id.into(),
                name: name.into(),
                slug: to_slug(name),
                categories: Some(categories.into()),
                description: Some("x".repeat(200)),
                ..Default::default()
            },
            moderation: ModerationFlags {
                featured,
                ..Default::default()
            },
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            last_synced_at: None,
        }
    }

    #[test]
    fn parse_defaults_slug_to_key() {
        let curated = parse_curated(CURATED).unwrap();
        assert_eq!(curated["pumpkin-patch"].slug, "pumpkin-patch");
        assert_eq!(curated["apple-orchard"].faqs.len(), 1);
    }

    #[test]
    fn matching_rules() {
        let curated = parse_curated(CURATED).unwrap();
        let apples = &curated["apple-orchard"];
        let trees = &curated["christmas-trees"];

        assert!(matches_category(apples, "apple orchards"));
        assert!(matches_category(apples, "Apple Orchard"));
        assert!(matches_category(trees, "Christmas Tree Farms near Ottawa"));
        assert!(matches_category(trees, "christmas tree"));
        assert!(matches_category(&curated["pumpkin-patch"], "Pumpkin-Patch"));
        assert!(!matches_category(apples, "Berry Picking"));
        assert!(!matches_category(apples, ""));
    }

    #[test]
    fn word_rule_needs_main_word_and_two_shared_words() {
        let curated = CuratedCategory {
            name: "Christmas Tree Farms".into(),
            slug: "christmas-trees".into(),
            description: String::new(),
            intro: String::new(),
            faqs: vec![],
        };
        assert!(matches_category(&curated, "Christmas Farms Tree"));
        assert!(!matches_category(&curated, "Tree Farms Christmas"));
        assert!(!matches_category(&curated, "Christmas Lights"));
    }

    #[test]
    fn grouping_dedupes_sorts_and_caps_featured() {
        let curated = parse_curated(CURATED).unwrap();
        let listings = vec![
            listing("1", "Delta Orchard", "Apple Orchard, Apple Orchards", false),
            listing("2", "Bravo Farm", "Apple Orchard", false),
            listing("3", "Charlie Farm", "Apple Orchard, Pumpkin Patch", true),
            listing("4", "Alpha Farm", "Apple Orchard", false),
            listing("5", "Echo Farm", "Berry Picking", false),
        ];
        let groups = group_by_category(&curated, &listings);

        assert_eq!(groups[0].slug, "apple-orchard");
        assert_eq!(groups[0].total_listings, 4);
        let names = groups[0]
            .featured_listings
            .iter()
            .map(|l| l.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Charlie Farm", "Alpha Farm", "Bravo Farm"]);
        assert!(groups[0].featured_listings[0].blurb.ends_with("..."));
        assert_eq!(groups[0].featured_listings[0].blurb.chars().count(), BLURB_CHARS + 3);

        assert_eq!(groups[1].slug, "pumpkin-patch");
        assert_eq!(groups[1].total_listings, 1);
        assert_eq!(groups[2].total_listings, 0);
        assert_eq!(groups.len(), 3);
    }
}
