//! Static-site build artifacts generated from the listing set.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use farmdir_core::{Location, StoredListing};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::info;

use crate::categories::{group_by_category, CuratedCategories};
use crate::geo::{join_locations, DEFAULT_RADIUS_KM};

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub out_dir: PathBuf,
    pub radius_km: f64,
}

impl BuildOptions {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            radius_km: DEFAULT_RADIUS_KM,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildInputs {
    pub listings: Vec<StoredListing>,
    pub locations: Vec<Location>,
    pub curated: CuratedCategories,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildManifest {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub listing_count: usize,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchData {
    categories: Vec<String>,
    locations: Vec<String>,
    generated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Coordinates {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LocationInput {
    name: String,
    #[serde(default, alias = "location_slug", alias = "locationSlug")]
    slug: Option<String>,
    #[serde(default, alias = "province", alias = "state_province")]
    region: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    coordinates: Option<Coordinates>,
    #[serde(default)]
    tier: Option<i32>,
}

impl From<LocationInput> for Location {
    fn from(input: LocationInput) -> Self {
        let nested = input.coordinates.as_ref();
        Location {
            name: input.name,
            slug: input.slug.unwrap_or_default(),
            region: input.region,
            country: input.country,
            latitude: nested.and_then(|c| c.latitude).or(input.latitude),
            longitude: nested.and_then(|c| c.longitude).or(input.longitude),
            tier: input.tier.unwrap_or(3),
        }
    }
}

/// Accepts a plain array or an object with a `locationPages` array.
pub fn parse_locations(value: JsonValue) -> Result<Vec<Location>> {
    let entries = match value {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut map) => match map.remove("locationPages") {
            Some(JsonValue::Array(items)) => items,
            _ => bail!("unsupported locations format: expected an array or an object with a locationPages array"),
        },
        _ => bail!("unsupported locations format: expected an array or an object with a locationPages array"),
    };
    entries
        .into_iter()
        .map(|entry| {
            serde_json::from_value::<LocationInput>(entry)
                .map(Location::from)
                .context("decoding location entry")
        })
        .collect()
}

pub fn parse_listings(value: JsonValue) -> Result<Vec<StoredListing>> {
    let entries = match value {
        JsonValue::Object(mut map) => match map.remove("results") {
            Some(results) => results,
            None => bail!("unsupported listings format: expected an array or an object with a results array"),
        },
        other => other,
    };
    serde_json::from_value(entries).context("decoding listings")
}

pub async fn load_locations_file(path: impl AsRef<Path>) -> Result<Vec<Location>> {
    let path = path.as_ref();
    let bytes = fs::read(path).await.with_context(|| format!("reading {}", path.display()))?;
    let value: JsonValue = serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
    parse_locations(value).with_context(|| format!("loading {}", path.display()))
}

pub async fn load_listings_file(path: impl AsRef<Path>) -> Result<Vec<StoredListing>> {
    let path = path.as_ref();
    let bytes = fs::read(path).await.with_context(|| format!("reading {}", path.display()))?;
    let value: JsonValue = serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
    parse_listings(value).with_context(|| format!("loading {}", path.display()))
}

pub async fn write_artifacts(inputs: &BuildInputs, options: &BuildOptions) -> Result<BuildManifest> {
    let out_dir = &options.out_dir;
    fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let listings = inputs
        .listings
        .iter()
        .filter(|l| l.moderation.active)
        .cloned()
        .collect::<Vec<_>>();
    let generated_at = Utc::now();

    let listing_params = listings
        .iter()
        .map(|l| serde_json::json!({ "slug": l.row.slug }))
        .collect::<Vec<_>>();

    let located = join_locations(&inputs.locations, &listings, options.radius_km);
    let location_params = located
        .iter()
        .map(|l| serde_json::json!({ "location": l.location.slug }))
        .collect::<Vec<_>>();

    let categories = group_by_category(&inputs.curated, &listings);
    let category_params = categories
        .iter()
        .filter(|c| c.total_listings > 0)
        .map(|c| serde_json::json!({ "slug": c.slug }))
        .collect::<Vec<_>>();

    let search_categories = listings
        .iter()
        .flat_map(|l| l.row.category_list())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    let search_locations = located
        .iter()
        .map(|l| l.location.label())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    let search_data = SearchData {
        categories: search_categories,
        locations: search_locations,
        generated_at,
    };

    let mut files = Vec::new();
    files.push(write_json(out_dir, "listings", "listings.json", &listings).await?);
    files.push(write_json(out_dir, "listing_params", "listing-params.json", &listing_params).await?);
    files.push(write_json(out_dir, "locations_with_listings", "locations-with-listings.json", &located).await?);
    files.push(write_json(out_dir, "location_params", "location-params.json", &location_params).await?);
    files.push(write_json(out_dir, "categories", "categories.json", &categories).await?);
    files.push(write_json(out_dir, "category_params", "category-params.json", &category_params).await?);
    files.push(write_json(out_dir, "search_data", "search-data.json", &search_data).await?);

    let manifest = BuildManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        generated_at,
        listing_count: listings.len(),
        files,
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest).context("serializing build manifest")?;
    fs::write(out_dir.join("manifest.json"), manifest_bytes)
        .await
        .context("writing manifest.json")?;

    info!(
        out_dir = %out_dir.display(),
        listings = manifest.listing_count,
        locations = located.len(),
        categories = category_params.len(),
        "build artifacts written"
    );
    Ok(manifest)
}

async fn write_json<T: Serialize + ?Sized>(
    out_dir: &Path,
    name: &str,
    file_name: &str,
    value: &T,
) -> Result<ManifestFile> {
    let bytes = serde_json::to_vec_pretty(value).with_context(|| format!("serializing {file_name}"))?;
    let path = out_dir.join(file_name);
    fs::write(&path, &bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(manifest_entry(name, file_name, &bytes))
}

fn manifest_entry(name: &str, rel_path: &str, bytes: &[u8]) -> ManifestFile {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    ManifestFile {
        name: name.to_string(),
        path: rel_path.to_string(),
        sha256: hex::encode(hasher.finalize()),
        bytes: bytes.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::parse_curated;
    use farmdir_core::{ListingRow, ModerationFlags};
    use serde_json::json;
    use tempfile::tempdir;

    fn listing(id: &str, name: &str, city: &str, lat: f64, lon: f64, categories: &str) -> StoredListing {
        StoredListing {
            id: uuid::Uuid::new_v4(),
            row: ListingRow {
                external_id: id.into(),
                name: name.into(),
                slug: farmdir_core::normalize::to_slug(name),
                city: Some(city.into()),
                region: Some("Ontario".into()),
                latitude: Some(lat),
                longitude: Some(lon),
                categories: Some(categories.into()),
                ..Default::default()
            },
            moderation: ModerationFlags::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_synced_at: None,
        }
    }

    #[test]
    fn manifest_hash_is_stable() {
        let entry = manifest_entry("x", "x.json", b"hello world");
        assert_eq!(
            entry.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(entry.bytes, 11);
    }

    #[test]
    fn locations_accept_both_shapes_and_nested_coordinates() {
        let flat = parse_locations(json!([
            { "name": "Guelph", "province": "Ontario", "country": "Canada", "latitude": 43.5, "longitude": -80.2 }
        ]))
        .unwrap();
        assert_eq!(flat[0].region.as_deref(), Some("Ontario"));
        assert_eq!(flat[0].latitude, Some(43.5));
        assert_eq!(flat[0].tier, 3);

        let paged = parse_locations(json!({
            "metadata": { "total": 1 },
            "locationPages": [
                { "name": "Milton", "location_slug": "milton-on", "coordinates": { "latitude": 43.5, "longitude": -79.9 } }
            ]
        }))
        .unwrap();
        assert_eq!(paged[0].slug, "milton-on");
        assert_eq!(paged[0].longitude, Some(-79.9));

        assert!(parse_locations(json!({ "cities": [] })).is_err());
        assert!(parse_locations(json!("nope")).is_err());
    }

    #[test]
    fn listings_accept_array_or_results_envelope() {
        let entry = json!({ "externalId": "zcrm_1", "name": "A", "slug": "a", "categories": ["Apple Orchard"] });
        let plain = parse_listings(json!([entry.clone()])).unwrap();
        let wrapped = parse_listings(json!({ "results": [entry], "count": 1 })).unwrap();
        assert_eq!(plain[0].row.slug, "a");
        assert_eq!(wrapped[0].row.categories.as_deref(), Some("Apple Orchard"));
        assert!(plain[0].moderation.active);
    }

    #[tokio::test]
    async fn writes_all_artifacts_with_manifest() {
        let dir = tempdir().expect("tempdir");
        let mut hidden = listing("zcrm_3", "Hidden Farm", "Guelph", 43.55, -80.25, "Apple Orchard");
        hidden.moderation.active = false;
        let inputs = BuildInputs {
            listings: vec![
                listing("zcrm_1", "Sunny Acres", "Guelph", 43.55, -80.25, "Apple Orchard, Pumpkin Patch"),
                listing("zcrm_2", "Berry Hill", "Milton", 43.51, -79.88, "Berry Picking"),
                hidden,
            ],
            locations: vec![
                Location {
                    name: "Guelph".into(),
                    slug: String::new(),
                    region: Some("Ontario".into()),
                    country: Some("Canada".into()),
                    latitude: Some(43.5448),
                    longitude: Some(-80.2482),
                    tier: 2,
                },
                Location {
                    name: "Thunder Bay".into(),
                    slug: String::new(),
                    region: Some("Ontario".into()),
                    country: Some("Canada".into()),
                    latitude: Some(48.38),
                    longitude: Some(-89.25),
                    tier: 3,
                },
            ],
            curated: parse_curated("apple-orchard:\n  name: Apple Orchards\nchristmas-trees:\n  name: Christmas Tree Farms\n")
                .unwrap(),
        };

        let manifest = write_artifacts(&inputs, &BuildOptions::new(dir.path())).await.unwrap();
        assert_eq!(manifest.listing_count, 2);
        assert_eq!(manifest.files.len(), 7);

        for file in &manifest.files {
            let bytes = std::fs::read(dir.path().join(&file.path)).unwrap();
            assert_eq!(bytes.len() as u64, file.bytes);
            assert_eq!(file.sha256, manifest_entry(&file.name, &file.path, &bytes).sha256);
        }

        let read = |name: &str| -> JsonValue {
            serde_json::from_slice(&std::fs::read(dir.path().join(name)).unwrap()).unwrap()
        };

        let located = read("locations-with-listings.json");
        assert_eq!(located.as_array().unwrap().len(), 1);
        assert_eq!(located[0]["name"], "Guelph");
        assert_eq!(located[0]["listingCount"], 2);
        assert_eq!(located[0]["listings"][0]["id"], "zcrm_1");
        assert_eq!(read("location-params.json"), json!([{ "location": "guelph-ontario-canada" }]));

        let categories = read("categories.json");
        assert_eq!(categories[0]["slug"], "apple-orchard");
        assert_eq!(categories[0]["totalListings"], 1);
        assert_eq!(read("category-params.json"), json!([{ "slug": "apple-orchard" }]));

        let search = read("search-data.json");
        assert_eq!(search["categories"], json!(["Apple Orchard", "Berry Picking", "Pumpkin Patch"]));
        assert_eq!(search["locations"], json!(["Guelph, Ontario"]));

        let listings = read("listings.json");
        assert_eq!(listings.as_array().unwrap().len(), 2);
        assert_eq!(listings[0]["categories"], json!(["Apple Orchard", "Pumpkin Patch"]));
        assert!(dir.path().join("manifest.json").exists());
    }
}
