//! Listing storage: the `ListingStore` contract plus PostgreSQL and in-memory backends.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farmdir_core::{
    ListingRow, Location, LocationAggregate, ModerationFlags, ModerationUpdate, SearchHit,
    StoredListing, WeeklyHours,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "farmdir-storage";

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 200;
pub const DEFAULT_SEARCH_LIMIT: i64 = 20;
pub const MAX_SEARCH_LIMIT: i64 = 100;

const SLUG_CONSTRAINT: &str = "listings_slug_key";
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("slug `{slug}` is already taken by another listing")]
    SlugConflict { slug: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Updated => "updated",
        }
    }
}

/// Filters for the listing endpoint. `category` is accepted but not applied yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingFilter {
    pub region: Option<String>,
    pub city: Option<String>,
    pub category: Option<String>,
    pub limit: i64,
}

pub fn clamp_limit(requested: Option<i64>, default: i64, max: i64) -> i64 {
    requested.unwrap_or(default).clamp(1, max)
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn slug_in_use(&self, slug: &str, exclude_external_id: &str) -> Result<bool, StorageError>;

    async fn upsert_listing(
        &self,
        row: &ListingRow,
        synced_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StorageError>;

    async fn get_listing(&self, external_id: &str) -> Result<Option<StoredListing>, StorageError>;

    async fn set_moderation(
        &self,
        external_id: &str,
        update: &ModerationUpdate,
    ) -> Result<bool, StorageError>;

    async fn list_listings(&self, filter: &ListingFilter) -> Result<Vec<StoredListing>, StorageError>;

    async fn location_counts(&self, region: Option<&str>) -> Result<Vec<LocationAggregate>, StorageError>;

    async fn search_listings(&self, query: &str, limit: i64) -> Result<Vec<SearchHit>, StorageError>;

    async fn active_listings(&self) -> Result<Vec<StoredListing>, StorageError>;

    async fn locations(&self) -> Result<Vec<Location>, StorageError>;

    async fn upsert_location(&self, location: &Location) -> Result<(), StorageError>;

    async fn ping(&self) -> Result<(), StorageError>;
}

const LISTING_COLUMNS: &str = r#"
    id, external_id, name, slug, street, city, region, postal_code, country,
    latitude, longitude, phone, email, website, facebook_url, instagram_url,
    categories, service_types, amenities, varieties, payment_methods,
    pet_friendly, price_range_text, price_min, price_max, established_year,
    season_open, season_close,
    monday_hours, tuesday_hours, wednesday_hours, thursday_hours,
    friday_hours, saturday_hours, sunday_hours,
    description, place_id, verified, featured, active,
    created_at, updated_at, last_synced_at
"#;

#[derive(Debug, Clone)]
pub struct PgListingStore {
    pool: PgPool,
}

impl PgListingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("migrations applied");
        Ok(())
    }
}

fn is_slug_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some(UNIQUE_VIOLATION) && db.constraint() == Some(SLUG_CONSTRAINT)
        }
        _ => false,
    }
}

fn stored_listing_from_row(row: &PgRow) -> Result<StoredListing, sqlx::Error> {
    Ok(StoredListing {
        id: row.try_get("id")?,
        row: ListingRow {
            external_id: row.try_get("external_id")?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            street: row.try_get("street")?,
            city: row.try_get("city")?,
            region: row.try_get("region")?,
            postal_code: row.try_get("postal_code")?,
            country: row.try_get("country")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            phone: row.try_get("phone")?,
            email: row.try_get("email")?,
            website: row.try_get("website")?,
            facebook_url: row.try_get("facebook_url")?,
            instagram_url: row.try_get("instagram_url")?,
            categories: row.try_get("categories")?,
            service_types: row.try_get("service_types")?,
            amenities: row.try_get("amenities")?,
            varieties: row.try_get("varieties")?,
            payment_methods: row.try_get("payment_methods")?,
            pet_friendly: row.try_get("pet_friendly")?,
            price_range_text: row.try_get("price_range_text")?,
            price_min: row.try_get("price_min")?,
            price_max: row.try_get("price_max")?,
            established_year: row.try_get("established_year")?,
            season_open: row.try_get("season_open")?,
            season_close: row.try_get("season_close")?,
            hours: WeeklyHours {
                monday: row.try_get("monday_hours")?,
                tuesday: row.try_get("tuesday_hours")?,
                wednesday: row.try_get("wednesday_hours")?,
                thursday: row.try_get("thursday_hours")?,
                friday: row.try_get("friday_hours")?,
                saturday: row.try_get("saturday_hours")?,
                sunday: row.try_get("sunday_hours")?,
            },
            description: row.try_get("description")?,
            place_id: row.try_get("place_id")?,
        },
        moderation: ModerationFlags {
            verified: row.try_get("verified")?,
            featured: row.try_get("featured")?,
            active: row.try_get("active")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_synced_at: row.try_get("last_synced_at")?,
    })
}

fn location_from_row(row: &PgRow) -> Result<Location, sqlx::Error> {
    Ok(Location {
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        region: row.try_get("region")?,
        country: row.try_get("country")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        tier: row.try_get("tier")?,
    })
}

#[async_trait]
impl ListingStore for PgListingStore {
    async fn slug_in_use(&self, slug: &str, exclude_external_id: &str) -> Result<bool, StorageError> {
        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM listings
                 WHERE slug = $1
                   AND external_id <> $2
            )
            "#,
        )
        .bind(slug)
        .bind(exclude_external_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    async fn upsert_listing(
        &self,
        row: &ListingRow,
        synced_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO listings (
                external_id, name, slug, street, city, region, postal_code, country,
                latitude, longitude, phone, email, website, facebook_url, instagram_url,
                categories, service_types, amenities, varieties, payment_methods,
                pet_friendly, price_range_text, price_min, price_max, established_year,
                season_open, season_close,
                monday_hours, tuesday_hours, wednesday_hours, thursday_hours,
                friday_hours, saturday_hours, sunday_hours,
                description, place_id,
                verified, featured, active, last_synced_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8,
                $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20,
                $21, $22, $23, $24, $25,
                $26, $27,
                $28, $29, $30, $31,
                $32, $33, $34,
                $35, $36,
                FALSE, FALSE, TRUE, $37, $37
            )
            ON CONFLICT (external_id) DO UPDATE SET
                name = EXCLUDED.name,
                slug = EXCLUDED.slug,
                street = EXCLUDED.street,
                city = EXCLUDED.city,
                region = EXCLUDED.region,
                postal_code = EXCLUDED.postal_code,
                country = EXCLUDED.country,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                phone = EXCLUDED.phone,
                email = EXCLUDED.email,
                website = EXCLUDED.website,
                facebook_url = EXCLUDED.facebook_url,
                instagram_url = EXCLUDED.instagram_url,
                categories = EXCLUDED.categories,
                service_types = EXCLUDED.service_types,
                amenities = EXCLUDED.amenities,
                varieties = EXCLUDED.varieties,
                payment_methods = EXCLUDED.payment_methods,
                pet_friendly = EXCLUDED.pet_friendly,
                price_range_text = EXCLUDED.price_range_text,
                price_min = EXCLUDED.price_min,
                price_max = EXCLUDED.price_max,
                established_year = EXCLUDED.established_year,
                season_open = EXCLUDED.season_open,
                season_close = EXCLUDED.season_close,
                monday_hours = EXCLUDED.monday_hours,
                tuesday_hours = EXCLUDED.tuesday_hours,
                wednesday_hours = EXCLUDED.wednesday_hours,
                thursday_hours = EXCLUDED.thursday_hours,
                friday_hours = EXCLUDED.friday_hours,
                saturday_hours = EXCLUDED.saturday_hours,
                sunday_hours = EXCLUDED.sunday_hours,
                description = EXCLUDED.description,
                place_id = EXCLUDED.place_id,
                last_synced_at = EXCLUDED.last_synced_at,
                updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&row.external_id)
        .bind(&row.name)
        .bind(&row.slug)
        .bind(&row.street)
        .bind(&row.city)
        .bind(&row.region)
        .bind(&row.postal_code)
        .bind(&row.country)
        .bind(row.latitude)
        .bind(row.longitude)
        .bind(&row.phone)
        .bind(&row.email)
        .bind(&row.website)
        .bind(&row.facebook_url)
        .bind(&row.instagram_url)
        .bind(&row.categories)
        .bind(&row.service_types)
        .bind(&row.amenities)
        .bind(&row.varieties)
        .bind(&row.payment_methods)
        .bind(row.pet_friendly)
        .bind(&row.price_range_text)
        .bind(row.price_min)
        .bind(row.price_max)
        .bind(row.established_year)
        .bind(&row.season_open)
        .bind(&row.season_close)
        .bind(&row.hours.monday)
        .bind(&row.hours.tuesday)
        .bind(&row.hours.wednesday)
        .bind(&row.hours.thursday)
        .bind(&row.hours.friday)
        .bind(&row.hours.saturday)
        .bind(&row.hours.sunday)
        .bind(&row.description)
        .bind(&row.place_id)
        .bind(synced_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(pg_row) => {
                let inserted: bool = pg_row.try_get("inserted")?;
                debug!(external_id = %row.external_id, inserted, "listing upserted");
                Ok(if inserted {
                    UpsertOutcome::Inserted
                } else {
                    UpsertOutcome::Updated
                })
            }
            Err(err) if is_slug_conflict(&err) => Err(StorageError::SlugConflict {
                slug: row.slug.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_listing(&self, external_id: &str) -> Result<Option<StoredListing>, StorageError> {
        let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE external_id = $1");
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(stored_listing_from_row).transpose()?)
    }

    async fn set_moderation(
        &self,
        external_id: &str,
        update: &ModerationUpdate,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE listings
               SET verified = COALESCE($2, verified),
                   featured = COALESCE($3, featured),
                   active = COALESCE($4, active),
                   updated_at = NOW()
             WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .bind(update.verified)
        .bind(update.featured)
        .bind(update.active)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_listings(&self, filter: &ListingFilter) -> Result<Vec<StoredListing>, StorageError> {
        let sql = format!(
            r#"
            SELECT {LISTING_COLUMNS}
              FROM listings
             WHERE active
               AND ($1::text IS NULL OR lower(region) = lower($1))
               AND ($2::text IS NULL OR lower(city) = lower($2))
             ORDER BY featured DESC, verified DESC, lower(name) ASC
             LIMIT $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.region.as_deref())
            .bind(filter.city.as_deref())
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(stored_listing_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn location_counts(&self, region: Option<&str>) -> Result<Vec<LocationAggregate>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT loc.name, loc.slug, loc.region, loc.country,
                   loc.latitude, loc.longitude, loc.tier,
                   COUNT(l.id) AS listing_count
              FROM locations loc
              LEFT JOIN listings l
                ON l.active
               AND lower(l.city) = lower(loc.name)
             WHERE ($1::text IS NULL OR lower(loc.region) = lower($1))
             GROUP BY loc.id
             ORDER BY loc.tier ASC, lower(loc.name) ASC
            "#,
        )
        .bind(region)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(LocationAggregate {
                location: location_from_row(row)?,
                listing_count: row.try_get("listing_count")?,
            });
        }
        Ok(out)
    }

    async fn search_listings(&self, query: &str, limit: i64) -> Result<Vec<SearchHit>, StorageError> {
        let sql = format!(
            r#"
            SELECT {LISTING_COLUMNS},
                   ts_rank(search_vector, q) AS rank
              FROM listings, plainto_tsquery('english', $1) q
             WHERE active
               AND search_vector @@ q
             ORDER BY rank DESC, lower(name) ASC
             LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(SearchHit {
                listing: stored_listing_from_row(row)?,
                rank: row.try_get("rank")?,
            });
        }
        Ok(out)
    }

    async fn active_listings(&self) -> Result<Vec<StoredListing>, StorageError> {
        let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE active ORDER BY lower(name) ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(stored_listing_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn locations(&self) -> Result<Vec<Location>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT name, slug, region, country, latitude, longitude, tier
              FROM locations
             ORDER BY tier ASC, lower(name) ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(location_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn upsert_location(&self, location: &Location) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO locations (name, slug, region, country, latitude, longitude, tier)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (slug) DO UPDATE SET
                name = EXCLUDED.name,
                region = EXCLUDED.region,
                country = EXCLUDED.country,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                tier = EXCLUDED.tier
            "#,
        )
        .bind(&location.name)
        .bind(location.effective_slug())
        .bind(&location.region)
        .bind(&location.country)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.tier)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryListingStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    listings: Vec<StoredListing>,
    locations: Vec<Location>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(listings: Vec<StoredListing>, locations: Vec<Location>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                listings,
                locations,
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.listings.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn listing_sort_key(a: &StoredListing, b: &StoredListing) -> Ordering {
    b.moderation
        .featured
        .cmp(&a.moderation.featured)
        .then(b.moderation.verified.cmp(&a.moderation.verified))
        .then_with(|| by_name(&a.row.name, &b.row.name))
}

fn by_name(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

fn eq_ignore_case(a: Option<&str>, b: &str) -> bool {
    a.map(|a| a.trim().eq_ignore_ascii_case(b.trim())).unwrap_or(false)
}

/// Every term must appear; name hits weigh more than description/address hits.
fn memory_rank(listing: &StoredListing, terms: &[String]) -> Option<f32> {
    let name = listing.row.name.to_lowercase();
    let body = [
        listing.row.description.as_deref(),
        listing.row.street.as_deref(),
        listing.row.city.as_deref(),
        listing.row.region.as_deref(),
        listing.row.postal_code.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase();

    let mut rank = 0.0f32;
    for term in terms {
        if name.contains(term.as_str()) {
            rank += 1.0;
        } else if body.contains(term.as_str()) {
            rank += 0.4;
        } else {
            return None;
        }
    }
    Some(rank / terms.len().max(1) as f32)
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn slug_in_use(&self, slug: &str, exclude_external_id: &str) -> Result<bool, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .listings
            .iter()
            .any(|l| l.row.slug == slug && l.row.external_id != exclude_external_id))
    }

    async fn upsert_listing(
        &self,
        row: &ListingRow,
        synced_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StorageError> {
        let mut state = self.state.lock().await;
        if state
            .listings
            .iter()
            .any(|l| l.row.slug == row.slug && l.row.external_id != row.external_id)
        {
            return Err(StorageError::SlugConflict {
                slug: row.slug.clone(),
            });
        }

        if let Some(existing) = state
            .listings
            .iter_mut()
            .find(|l| l.row.external_id == row.external_id)
        {
            existing.row = row.clone();
            existing.updated_at = synced_at;
            existing.last_synced_at = Some(synced_at);
            return Ok(UpsertOutcome::Updated);
        }

        state.listings.push(StoredListing {
            id: Uuid::new_v4(),
            row: row.clone(),
            moderation: ModerationFlags::default(),
            created_at: synced_at,
            updated_at: synced_at,
            last_synced_at: Some(synced_at),
        });
        Ok(UpsertOutcome::Inserted)
    }

    async fn get_listing(&self, external_id: &str) -> Result<Option<StoredListing>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .listings
            .iter()
            .find(|l| l.row.external_id == external_id)
            .cloned())
    }

    async fn set_moderation(
        &self,
        external_id: &str,
        update: &ModerationUpdate,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        match state
            .listings
            .iter_mut()
            .find(|l| l.row.external_id == external_id)
        {
            Some(listing) => {
                update.apply_to(&mut listing.moderation);
                listing.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_listings(&self, filter: &ListingFilter) -> Result<Vec<StoredListing>, StorageError> {
        let state = self.state.lock().await;
        let mut out = state
            .listings
            .iter()
            .filter(|l| l.moderation.active)
            .filter(|l| {
                filter
                    .region
                    .as_deref()
                    .map(|r| eq_ignore_case(l.row.region.as_deref(), r))
                    .unwrap_or(true)
            })
            .filter(|l| {
                filter
                    .city
                    .as_deref()
                    .map(|c| eq_ignore_case(l.row.city.as_deref(), c))
                    .unwrap_or(true)
            })
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(listing_sort_key);
        out.truncate(filter.limit.max(0) as usize);
        Ok(out)
    }

    async fn location_counts(&self, region: Option<&str>) -> Result<Vec<LocationAggregate>, StorageError> {
        let state = self.state.lock().await;
        let mut out = state
            .locations
            .iter()
            .filter(|loc| {
                region
                    .map(|r| eq_ignore_case(loc.region.as_deref(), r))
                    .unwrap_or(true)
            })
            .map(|loc| LocationAggregate {
                location: loc.clone(),
                listing_count: state
                    .listings
                    .iter()
                    .filter(|l| l.moderation.active && eq_ignore_case(l.row.city.as_deref(), &loc.name))
                    .count() as i64,
            })
            .collect::<Vec<_>>();
        out.sort_by(|a, b| {
            a.location
                .tier
                .cmp(&b.location.tier)
                .then_with(|| by_name(&a.location.name, &b.location.name))
        });
        Ok(out)
    }

    async fn search_listings(&self, query: &str, limit: i64) -> Result<Vec<SearchHit>, StorageError> {
        let terms = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect::<Vec<_>>();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.lock().await;
        let mut hits = state
            .listings
            .iter()
            .filter(|l| l.moderation.active)
            .filter_map(|l| {
                memory_rank(l, &terms).map(|rank| SearchHit {
                    listing: l.clone(),
                    rank,
                })
            })
            .collect::<Vec<_>>();
        hits.sort_by(|a, b| {
            b.rank
                .partial_cmp(&a.rank)
                .unwrap_or(Ordering::Equal)
                .then_with(|| by_name(&a.listing.row.name, &b.listing.row.name))
        });
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }

    async fn active_listings(&self) -> Result<Vec<StoredListing>, StorageError> {
        let state = self.state.lock().await;
        let mut out = state
            .listings
            .iter()
            .filter(|l| l.moderation.active)
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| by_name(&a.row.name, &b.row.name));
        Ok(out)
    }

    async fn locations(&self) -> Result<Vec<Location>, StorageError> {
        let state = self.state.lock().await;
        let mut out = state.locations.clone();
        out.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| by_name(&a.name, &b.name)));
        Ok(out)
    }

    async fn upsert_location(&self, location: &Location) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        let slug = location.effective_slug();
        let mut incoming = location.clone();
        incoming.slug = slug.clone();
        match state.locations.iter_mut().find(|l| l.effective_slug() == slug) {
            Some(existing) => *existing = incoming,
            None => state.locations.push(incoming),
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
