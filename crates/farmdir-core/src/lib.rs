//! Core domain model for the farm directory: CRM records, stored listings and locations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub mod normalize;

pub const CRATE_NAME: &str = "farmdir-core";

/// Namespace prefix marking an external id as CRM-sourced in storage.
pub const EXTERNAL_ID_PREFIX: &str = "zcrm_";

/// Fallback slug when neither an override nor a name yields one.
pub const DEFAULT_SLUG: &str = "farm";

/// A CRM record identifier in both of its forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalId {
    storage: String,
    crm: String,
}

impl ExternalId {
    /// Accepts either the bare CRM id or the prefixed storage form.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let bare = trimmed.strip_prefix(EXTERNAL_ID_PREFIX).unwrap_or(trimmed).trim();
        if bare.is_empty() {
            return None;
        }
        Some(Self {
            storage: format!("{EXTERNAL_ID_PREFIX}{bare}"),
            crm: bare.to_string(),
        })
    }

    pub fn storage_id(&self) -> &str {
        &self.storage
    }

    pub fn crm_id(&self) -> &str {
        &self.crm
    }
}

impl std::fmt::Display for ExternalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage)
    }
}

/// One farm record as projected from the CRM.
///
/// Text fields are decoded leniently; list, numeric and yes/no fields keep the
/// raw JSON value so the normalizer can handle every representation the CRM emits.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CrmRecord {
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: Option<String>,
    #[serde(rename = "Account_Name", default, deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(rename = "Slug", default, deserialize_with = "lenient_text")]
    pub slug_override: Option<String>,
    #[serde(rename = "Billing_Street", default, deserialize_with = "lenient_text")]
    pub street: Option<String>,
    #[serde(rename = "Billing_City", default, deserialize_with = "lenient_text")]
    pub city: Option<String>,
    #[serde(rename = "Billing_State", default, deserialize_with = "lenient_text")]
    pub region: Option<String>,
    #[serde(rename = "Billing_Code", default, deserialize_with = "lenient_text")]
    pub postal_code: Option<String>,
    #[serde(rename = "Billing_Country", default, deserialize_with = "lenient_text")]
    pub country: Option<String>,
    #[serde(rename = "Latitude", default)]
    pub latitude: Option<JsonValue>,
    #[serde(rename = "Longitude", default)]
    pub longitude: Option<JsonValue>,
    #[serde(rename = "Phone", default, deserialize_with = "lenient_text")]
    pub phone: Option<String>,
    #[serde(rename = "Email", default, deserialize_with = "lenient_text")]
    pub email: Option<String>,
    #[serde(rename = "Website", default, deserialize_with = "lenient_text")]
    pub website: Option<String>,
    #[serde(rename = "Facebook", default, deserialize_with = "lenient_text")]
    pub facebook_url: Option<String>,
    #[serde(rename = "Instagram", default, deserialize_with = "lenient_text")]
    pub instagram_url: Option<String>,
    #[serde(rename = "Categories", default)]
    pub categories: Option<JsonValue>,
    #[serde(rename = "Service_Types", default)]
    pub service_types: Option<JsonValue>,
    #[serde(rename = "Amenities", default)]
    pub amenities: Option<JsonValue>,
    #[serde(rename = "Varieties", default)]
    pub varieties: Option<JsonValue>,
    #[serde(rename = "Payment_Methods", default)]
    pub payment_methods: Option<JsonValue>,
    #[serde(rename = "Pet_Friendly", default)]
    pub pet_friendly: Option<JsonValue>,
    #[serde(rename = "Price_Range", default, deserialize_with = "lenient_text")]
    pub price_range: Option<String>,
    #[serde(rename = "Established_Year", default)]
    pub established_year: Option<JsonValue>,
    #[serde(rename = "Season_Open", default, deserialize_with = "lenient_text")]
    pub season_open: Option<String>,
    #[serde(rename = "Season_Close", default, deserialize_with = "lenient_text")]
    pub season_close: Option<String>,
    #[serde(rename = "Monday_Hours", default, deserialize_with = "lenient_text")]
    pub monday_hours: Option<String>,
    #[serde(rename = "Tuesday_Hours", default, deserialize_with = "lenient_text")]
    pub tuesday_hours: Option<String>,
    #[serde(rename = "Wednesday_Hours", default, deserialize_with = "lenient_text")]
    pub wednesday_hours: Option<String>,
    #[serde(rename = "Thursday_Hours", default, deserialize_with = "lenient_text")]
    pub thursday_hours: Option<String>,
    #[serde(rename = "Friday_Hours", default, deserialize_with = "lenient_text")]
    pub friday_hours: Option<String>,
    #[serde(rename = "Saturday_Hours", default, deserialize_with = "lenient_text")]
    pub saturday_hours: Option<String>,
    #[serde(rename = "Sunday_Hours", default, deserialize_with = "lenient_text")]
    pub sunday_hours: Option<String>,
    #[serde(rename = "Description", default, deserialize_with = "lenient_text")]
    pub description: Option<String>,
    #[serde(rename = "Place_ID", default, deserialize_with = "lenient_text")]
    pub place_id: Option<String>,
}

/// Free-text opening hours per weekday.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyHours {
    pub monday: Option<String>,
    pub tuesday: Option<String>,
    pub wednesday: Option<String>,
    pub thursday: Option<String>,
    pub friday: Option<String>,
    pub saturday: Option<String>,
    pub sunday: Option<String>,
}

/// Everything the sync pipeline writes for one listing.
///
/// List-typed fields are stored comma-joined and serialized as arrays.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRow {
    pub external_id: String,
    #[serde(default)]
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub facebook_url: Option<String>,
    #[serde(default)]
    pub instagram_url: Option<String>,
    #[serde(default, serialize_with = "delimited_as_list", deserialize_with = "list_as_delimited")]
    pub categories: Option<String>,
    #[serde(default, serialize_with = "delimited_as_list", deserialize_with = "list_as_delimited")]
    pub service_types: Option<String>,
    #[serde(default, serialize_with = "delimited_as_list", deserialize_with = "list_as_delimited")]
    pub amenities: Option<String>,
    #[serde(default, serialize_with = "delimited_as_list", deserialize_with = "list_as_delimited")]
    pub varieties: Option<String>,
    #[serde(default, serialize_with = "delimited_as_list", deserialize_with = "list_as_delimited")]
    pub payment_methods: Option<String>,
    #[serde(default)]
    pub pet_friendly: Option<bool>,
    #[serde(default)]
    pub price_range_text: Option<String>,
    #[serde(default)]
    pub price_min: Option<f64>,
    #[serde(default)]
    pub price_max: Option<f64>,
    #[serde(default)]
    pub established_year: Option<i32>,
    #[serde(default)]
    pub season_open: Option<String>,
    #[serde(default)]
    pub season_close: Option<String>,
    #[serde(default)]
    pub hours: WeeklyHours,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub place_id: Option<String>,
}

impl ListingRow {
    pub fn category_list(&self) -> Vec<String> {
        self.categories
            .as_deref()
            .map(normalize::split_delimited_list)
            .unwrap_or_default()
    }

    pub fn has_coordinates(&self) -> bool {
        matches!((self.latitude, self.longitude), (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite())
    }
}

/// Moderation state owned by the directory operators, never by the CRM sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModerationFlags {
    pub verified: bool,
    pub featured: bool,
    pub active: bool,
}

impl Default for ModerationFlags {
    fn default() -> Self {
        Self {
            verified: false,
            featured: false,
            active: true,
        }
    }
}

/// Partial moderation change; `None` leaves the flag untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModerationUpdate {
    pub verified: Option<bool>,
    pub featured: Option<bool>,
    pub active: Option<bool>,
}

impl ModerationUpdate {
    pub fn is_empty(&self) -> bool {
        self.verified.is_none() && self.featured.is_none() && self.active.is_none()
    }

    pub fn apply_to(&self, flags: &mut ModerationFlags) {
        if let Some(v) = self.verified {
            flags.verified = v;
        }
        if let Some(v) = self.featured {
            flags.featured = v;
        }
        if let Some(v) = self.active {
            flags.active = v;
        }
    }
}

/// A listing as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredListing {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(flatten)]
    pub row: ListingRow,
    #[serde(flatten)]
    pub moderation: ModerationFlags,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl StoredListing {
    pub fn url_path(&self) -> String {
        format!("/farms/{}", self.row.slug)
    }
}

/// A full-text search result with the rank assigned by storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    #[serde(flatten)]
    pub listing: StoredListing,
    pub rank: f32,
}

/// A known city/town used for location pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default = "default_tier")]
    pub tier: i32,
}

fn default_tier() -> i32 {
    3
}

impl Location {
    /// Slug derived from name, region and country when none was supplied.
    pub fn derived_slug(&self) -> String {
        let parts = [
            Some(self.name.as_str()),
            self.region.as_deref(),
            self.country.as_deref(),
        ];
        let joined = parts.into_iter().flatten().collect::<Vec<_>>().join(" ");
        normalize::to_slug(&joined)
    }

    pub fn effective_slug(&self) -> String {
        if self.slug.trim().is_empty() {
            self.derived_slug()
        } else {
            self.slug.clone()
        }
    }

    /// `"City, Region"` label used by search dropdowns.
    pub fn label(&self) -> String {
        match self.region.as_deref().filter(|r| !r.trim().is_empty()) {
            Some(region) => format!("{}, {}", self.name, region),
            None => self.name.clone(),
        }
    }
}

/// A location with the number of active listings in its city.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationAggregate {
    #[serde(flatten)]
    pub location: Location,
    pub listing_count: i64,
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(normalize::value_to_text))
}

fn list_as_delimited<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::Array(items)) if items.is_empty() => None,
        other => normalize::to_delimited_list(other.as_ref()),
    })
}

fn delimited_as_list<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let items = value
        .as_deref()
        .map(normalize::split_delimited_list)
        .unwrap_or_default();
    items.serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn external_id_accepts_both_forms() {
        let bare = ExternalId::parse("123").unwrap();
        let prefixed = ExternalId::parse("zcrm_123").unwrap();
        assert_eq!(bare, prefixed);
        assert_eq!(bare.storage_id(), "zcrm_123");
        assert_eq!(bare.crm_id(), "123");
        assert!(ExternalId::parse("  ").is_none());
        assert!(ExternalId::parse("zcrm_").is_none());
    }

    #[test]
    fn crm_record_decodes_mixed_field_shapes() {
        let record: CrmRecord = serde_json::from_value(json!({
            "id": "5725767000000412001",
            "Account_Name": "Sunny Acres",
            "Phone": 5551234,
            "Categories": ["Apple Orchard", "Pumpkin Patch"],
            "Pet_Friendly": "Yes",
            "Latitude": "",
            "Established_Year": "1987",
            "Unprojected_Field": "ignored"
        }))
        .unwrap();

        assert_eq!(record.id.as_deref(), Some("5725767000000412001"));
        assert_eq!(record.name.as_deref(), Some("Sunny Acres"));
        assert_eq!(record.phone.as_deref(), Some("5551234"));
        assert_eq!(record.latitude, Some(json!("")));
        assert!(record.website.is_none());
    }

    #[test]
    fn listing_row_serializes_lists_as_arrays_and_reads_them_back() {
        let row = ListingRow {
            external_id: "zcrm_1".into(),
            name: "Sunny Acres".into(),
            slug: "sunny-acres".into(),
            categories: Some("Apple Orchard, Pumpkin Patch".into()),
            ..Default::default()
        };
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["categories"], json!(["Apple Orchard", "Pumpkin Patch"]));
        assert_eq!(value["amenities"], json!([]));
        assert_eq!(value["externalId"], json!("zcrm_1"));

        let back: ListingRow = serde_json::from_value(value).unwrap();
        assert_eq!(back.categories.as_deref(), Some("Apple Orchard, Pumpkin Patch"));
        assert_eq!(back.amenities, None);
    }

    #[test]
    fn listing_row_accepts_comma_joined_list_input() {
        let row: ListingRow = serde_json::from_value(json!({
            "externalId": "zcrm_2",
            "slug": "x",
            "categories": "Berry Picking,Christmas Trees"
        }))
        .unwrap();
        assert_eq!(
            row.category_list(),
            vec!["Berry Picking".to_string(), "Christmas Trees".to_string()]
        );
    }

    #[test]
    fn moderation_update_only_touches_named_flags() {
        let mut flags = ModerationFlags::default();
        ModerationUpdate {
            featured: Some(true),
            ..Default::default()
        }
        .apply_to(&mut flags);
        assert!(flags.featured);
        assert!(!flags.verified);
        assert!(flags.active);
    }

    #[test]
    fn location_slug_falls_back_to_name_region_country() {
        let loc = Location {
            name: "St. Catharines".into(),
            slug: String::new(),
            region: Some("Ontario".into()),
            country: Some("Canada".into()),
            latitude: None,
            longitude: None,
            tier: 1,
        };
        assert_eq!(loc.effective_slug(), "st-catharines-ontario-canada");
        assert_eq!(loc.label(), "St. Catharines, Ontario");
    }
}
