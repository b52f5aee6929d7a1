//! Build-time join of known locations to nearby listings.

use std::cmp::Ordering;

use farmdir_core::{Location, StoredListing};
use serde::Serialize;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const DEFAULT_RADIUS_KM: f64 = 75.0;

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// The radius is inclusive.
pub fn within_radius(distance_km: f64, radius_km: f64) -> bool {
    distance_km <= radius_km
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyListing {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub categories: Vec<String>,
    pub featured: bool,
    pub distance_km: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationWithListings {
    #[serde(flatten)]
    pub location: Location,
    pub listing_count: usize,
    pub listings: Vec<NearbyListing>,
}

pub fn join_locations(
    locations: &[Location],
    listings: &[StoredListing],
    radius_km: f64,
) -> Vec<LocationWithListings> {
    let candidates = listings
        .iter()
        .filter(|l| l.moderation.active)
        .filter_map(|l| match (l.row.latitude, l.row.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((l, lat, lon)),
            _ => None,
        })
        .collect::<Vec<_>>();

    let mut out = Vec::new();
    for location in locations {
        let (Some(loc_lat), Some(loc_lon)) = (location.latitude, location.longitude) else {
            continue;
        };

        let mut nearby = candidates
            .iter()
            .map(|(listing, lat, lon)| (*listing, *lat, *lon, haversine_km(loc_lat, loc_lon, *lat, *lon)))
            .filter(|(_, _, _, distance)| within_radius(*distance, radius_km))
            .collect::<Vec<_>>();
        if nearby.is_empty() {
            continue;
        }
        nearby.sort_by(|a, b| a.3.partial_cmp(&b.3).unwrap_or(Ordering::Equal));

        let listings = nearby
            .into_iter()
            .map(|(listing, lat, lon, distance)| NearbyListing {
                id: listing.row.external_id.clone(),
                name: listing.row.name.clone(),
                slug: listing.row.slug.clone(),
                url: listing.url_path(),
                latitude: lat,
                longitude: lon,
                city: listing.row.city.clone(),
                region: listing.row.region.clone(),
                country: listing.row.country.clone(),
                categories: listing.row.category_list(),
                featured: listing.moderation.featured,
                distance_km: distance.round() as i64,
            })
            .collect::<Vec<_>>();

        let mut location = location.clone();
        location.slug = location.effective_slug();
        out.push(LocationWithListings {
            location,
            listing_count: listings.len(),
            listings,
        });
    }

    out.sort_by(|a, b| {
        b.listing_count
            .cmp(&a.listing_count)
            .then_with(|| a.location.name.cmp(&b.location.name))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmdir_core::{ListingRow, ModerationFlags};

    fn listing(id: &str, lat: f64, lon: f64) -> StoredListing {
        StoredListing {
            id: uuid::Uuid::new_v4(),
            row: ListingRow {
                external_id: id.to_string(),
                name: format!("Farm {id}"),
                slug: format!("farm-{id}"),
                latitude: Some(lat),
                longitude: Some(lon),
                ..Default::default()
            },
            moderation: ModerationFlags::default(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            last_synced_at: None,
        }
    }

    fn location(name: &str, lat: f64, lon: f64) -> Location {
        Location {
            name: name.to_string(),
            slug: String::new(),
            region: Some("Ontario".into()),
            country: Some("Canada".into()),
            latitude: Some(lat),
            longitude: Some(lon),
            tier: 1,
        }
    }

    /// Latitude offset (degrees, same meridian) that is `km` kilometers away.
    fn lat_offset(km: f64) -> f64 {
        (km / EARTH_RADIUS_KM).to_degrees()
    }

    #[test]
    fn haversine_known_distance() {
        // Toronto to Ottawa is roughly 352 km.
        let d = haversine_km(43.6532, -79.3832, 45.4215, -75.6972);
        assert!((d - 352.0).abs() < 5.0, "{d}");
        assert_eq!(haversine_km(10.0, 10.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn radius_boundary_is_inclusive() {
        assert!(within_radius(75.0, DEFAULT_RADIUS_KM));
        assert!(!within_radius(75.01, DEFAULT_RADIUS_KM));
    }

    #[test]
    fn listing_at_exact_radius_is_kept_and_just_beyond_is_dropped() {
        let origin = location("Origin", 44.0, -80.0);
        let on_edge = listing("edge", 44.0 + lat_offset(70.0), -80.0);
        let edge_distance = haversine_km(44.0, -80.0, on_edge.row.latitude.unwrap(), -80.0);

        let joined = join_locations(&[origin.clone()], &[on_edge.clone()], edge_distance);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].listing_count, 1);

        let beyond = listing("beyond", 44.0 + lat_offset(75.01), -80.0);
        let joined = join_locations(&[origin], &[beyond], DEFAULT_RADIUS_KM);
        assert!(joined.is_empty());
    }

    #[test]
    fn join_sorts_by_distance_and_locations_by_count() {
        let near = listing("near", 44.0 + lat_offset(5.0), -80.0);
        let far = listing("far", 44.0 + lat_offset(40.0), -80.0);
        let mut inactive = listing("hidden", 44.0, -80.0);
        inactive.moderation.active = false;
        let mut no_coords = listing("nowhere", 0.0, 0.0);
        no_coords.row.latitude = None;

        let locations = vec![
            location("Zed", 44.0, -80.0),
            location("Alpha", 44.0 + lat_offset(40.0), -80.0),
            location("Lonely", 10.0, 10.0),
        ];
        let joined = join_locations(&locations, &[far, near, inactive, no_coords], DEFAULT_RADIUS_KM);

        let names = joined.iter().map(|l| l.location.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Alpha", "Zed"]);

        let zed = &joined[1];
        assert_eq!(zed.listings[0].id, "near");
        assert_eq!(zed.listings[0].distance_km, 5);
        assert_eq!(zed.listings[1].distance_km, 40);
        assert_eq!(zed.location.slug, "zed-ontario-canada");
        assert_eq!(zed.listings[0].url, "/farms/farm-near");
    }
}
