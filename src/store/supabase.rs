//! Supabase (PostgREST) row store using the service_role key

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::SupabaseConfig;

use super::{PlayerRow, SeatClaim, SeatRow, StoreError, WorldStore};

const PLAYERS_TABLE: &str = "world_players";
const SEATS_TABLE: &str = "venue_seats";

/// Thin PostgREST client
/// Uses service_role key which bypasses RLS - handle with care!
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            service_role_key: config.service_role_key.clone(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    async fn send(builder: RequestBuilder) -> Result<reqwest::Response, SupabaseError> {
        let response = builder.send().await.map_err(SupabaseError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SupabaseError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    /// Authenticated request with PostgREST filters as query pairs.
    /// Values are percent-encoded, so ids may contain any character.
    fn request(
        &self,
        method: Method,
        table: &str,
        query: &[(&str, String)],
    ) -> RequestBuilder {
        self.authed(self.client.request(method, self.rest_url(table)))
            .query(query)
    }

    /// Make an authenticated GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, SupabaseError> {
        let response = Self::send(self.request(Method::GET, table, query)).await?;
        response.json().await.map_err(SupabaseError::Parse)
    }

    /// Upsert (insert or update on conflict)
    pub async fn upsert<T: Serialize + ?Sized>(
        &self,
        table: &str,
        data: &T,
        on_conflict: &str,
    ) -> Result<(), SupabaseError> {
        let request = self
            .request(Method::POST, table, &[("on_conflict", on_conflict.to_string())])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(data);
        Self::send(request).await?;
        Ok(())
    }

    /// Insert rows, silently skipping ones that already exist
    pub async fn insert_missing<T: Serialize + ?Sized>(
        &self,
        table: &str,
        data: &T,
        on_conflict: &str,
    ) -> Result<(), SupabaseError> {
        let request = self
            .request(Method::POST, table, &[("on_conflict", on_conflict.to_string())])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(data);
        Self::send(request).await?;
        Ok(())
    }

    /// Make an authenticated PATCH request (update)
    pub async fn update<T: Serialize>(
        &self,
        table: &str,
        query: &[(&str, String)],
        data: &T,
    ) -> Result<(), SupabaseError> {
        let request = self.request(Method::PATCH, table, query).json(data);
        Self::send(request).await?;
        Ok(())
    }

    /// PATCH and return the rows that matched the filter.
    /// With a filter on the current value this is a compare-and-set: an empty
    /// result means another writer got there first.
    pub async fn update_returning<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
        data: &T,
    ) -> Result<Vec<R>, SupabaseError> {
        let request = self
            .request(Method::PATCH, table, query)
            .header("Prefer", "return=representation")
            .json(data);
        let response = Self::send(request).await?;
        response.json().await.map_err(SupabaseError::Parse)
    }

    /// Make an authenticated DELETE request
    pub async fn delete(&self, table: &str, query: &[(&str, String)]) -> Result<(), SupabaseError> {
        Self::send(self.request(Method::DELETE, table, query)).await?;
        Ok(())
    }
}

/// Supabase errors
#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),
}

/// `WorldStore` backed by two PostgREST tables
#[derive(Clone)]
pub struct SupabaseWorldStore {
    client: SupabaseClient,
}

#[derive(Serialize)]
struct LastSeenUpdate {
    last_seen: DateTime<Utc>,
}

#[derive(Serialize)]
struct OnlineUpdate {
    is_online: bool,
    last_seen: DateTime<Utc>,
}

#[derive(Serialize)]
struct OccupantUpdate {
    occupant_id: Option<Uuid>,
    occupied_at: Option<DateTime<Utc>>,
}

impl SupabaseWorldStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    fn venue_filter(venue_instance_id: &str) -> (&'static str, String) {
        // Quote so instance ids containing ':' or ',' stay a single value
        (
            "venue_instance_id",
            format!("eq.\"{}\"", venue_instance_id.replace('"', "")),
        )
    }

    fn id_filter(id: Uuid) -> [(&'static str, String); 1] {
        [("id", format!("eq.{}", id))]
    }
}

#[async_trait]
impl WorldStore for SupabaseWorldStore {
    fn backend(&self) -> &'static str {
        "supabase"
    }

    async fn load_player(&self, id: Uuid) -> Result<Option<PlayerRow>, StoreError> {
        let rows: Vec<PlayerRow> = self
            .client
            .get(
                PLAYERS_TABLE,
                &[("id", format!("eq.{}", id)), ("limit", "1".to_string())],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn save_player(&self, row: &PlayerRow) -> Result<(), StoreError> {
        self.client.upsert(PLAYERS_TABLE, row, "id").await?;
        Ok(())
    }

    async fn touch_last_seen(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.client
            .update(
                PLAYERS_TABLE,
                &Self::id_filter(id),
                &LastSeenUpdate { last_seen: at },
            )
            .await?;
        Ok(())
    }

    async fn mark_offline(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.client
            .update(
                PLAYERS_TABLE,
                &Self::id_filter(id),
                &OnlineUpdate {
                    is_online: false,
                    last_seen: at,
                },
            )
            .await?;
        Ok(())
    }

    async fn open_venue_seats(
        &self,
        venue_instance_id: &str,
        seat_count: u32,
    ) -> Result<(), StoreError> {
        let rows: Vec<SeatRow> = (0..seat_count)
            .map(|seat_index| SeatRow::empty(venue_instance_id, seat_index))
            .collect();
        self.client
            .insert_missing(SEATS_TABLE, &rows, "venue_instance_id,seat_index")
            .await?;
        Ok(())
    }

    async fn close_venue_seats(&self, venue_instance_id: &str) -> Result<(), StoreError> {
        self.client
            .delete(SEATS_TABLE, &[Self::venue_filter(venue_instance_id)])
            .await?;
        Ok(())
    }

    async fn seats(&self, venue_instance_id: &str) -> Result<Vec<SeatRow>, StoreError> {
        let query = [
            Self::venue_filter(venue_instance_id),
            ("order", "seat_index.asc".to_string()),
        ];
        Ok(self.client.get(SEATS_TABLE, &query).await?)
    }

    async fn seat_of(
        &self,
        venue_instance_id: &str,
        occupant_id: Uuid,
    ) -> Result<Option<u32>, StoreError> {
        let query = [
            Self::venue_filter(venue_instance_id),
            ("occupant_id", format!("eq.{}", occupant_id)),
            ("limit", "1".to_string()),
        ];
        let rows: Vec<SeatRow> = self.client.get(SEATS_TABLE, &query).await?;
        Ok(rows.first().map(|row| row.seat_index))
    }

    async fn claim_seat(
        &self,
        venue_instance_id: &str,
        seat_index: u32,
        occupant_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<SeatClaim, StoreError> {
        // Conditional write: only matches while the seat is still empty
        let query = [
            Self::venue_filter(venue_instance_id),
            ("seat_index", format!("eq.{}", seat_index)),
            ("occupant_id", "is.null".to_string()),
        ];
        let won: Vec<SeatRow> = self
            .client
            .update_returning(
                SEATS_TABLE,
                &query,
                &OccupantUpdate {
                    occupant_id: Some(occupant_id),
                    occupied_at: Some(at),
                },
            )
            .await?;

        if won.is_empty() {
            let query = [
                Self::venue_filter(venue_instance_id),
                ("seat_index", format!("eq.{}", seat_index)),
                ("limit", "1".to_string()),
            ];
            let current: Vec<SeatRow> = self.client.get(SEATS_TABLE, &query).await?;
            // A seat freed again between the write and this read still counts as lost
            return Ok(match current.first() {
                None => SeatClaim::NoSuchSeat,
                Some(row) => SeatClaim::Taken {
                    by: row.occupant_id,
                },
            });
        }

        // Vacate any other seat this occupant held in the venue. The claim is
        // already won, so a failure here is only logged; the stray seat goes
        // with the occupant's next release.
        let query = [
            Self::venue_filter(venue_instance_id),
            ("occupant_id", format!("eq.{}", occupant_id)),
            ("seat_index", format!("neq.{}", seat_index)),
        ];
        let released = match self
            .client
            .update_returning::<_, SeatRow>(
                SEATS_TABLE,
                &query,
                &OccupantUpdate {
                    occupant_id: None,
                    occupied_at: None,
                },
            )
            .await
        {
            Ok(rows) => rows.first().map(|row| row.seat_index),
            Err(e) => {
                warn!(
                    venue = venue_instance_id,
                    seat_index,
                    occupant_id = %occupant_id,
                    error = %e,
                    "Claimed seat but could not vacate the previous one"
                );
                None
            }
        };

        Ok(SeatClaim::Claimed { released })
    }

    async fn release_seat(
        &self,
        venue_instance_id: &str,
        occupant_id: Uuid,
    ) -> Result<Option<u32>, StoreError> {
        let query = [
            Self::venue_filter(venue_instance_id),
            ("occupant_id", format!("eq.{}", occupant_id)),
        ];
        let released: Vec<SeatRow> = self
            .client
            .update_returning(
                SEATS_TABLE,
                &query,
                &OccupantUpdate {
                    occupant_id: None,
                    occupied_at: None,
                },
            )
            .await?;
        Ok(released.first().map(|row| row.seat_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::patch;
    use axum::{Json, Router};
    use std::collections::HashMap;

    fn client(url: &str) -> SupabaseClient {
        SupabaseClient::new(&SupabaseConfig {
            url: url.into(),
            service_role_key: "key".into(),
        })
    }

    #[test]
    fn venue_filter_quotes_instance_ids() {
        assert_eq!(
            SupabaseWorldStore::venue_filter("cinema:film,1"),
            ("venue_instance_id", "eq.\"cinema:film,1\"".to_string())
        );
    }

    #[test]
    fn filters_are_percent_encoded() {
        let client = client("https://example.supabase.co");
        let request = client
            .request(
                Method::GET,
                SEATS_TABLE,
                &[SupabaseWorldStore::venue_filter("cinema:late show&more#2")],
            )
            .build()
            .unwrap();

        let url = request.url();
        assert_eq!(url.fragment(), None);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![(
                "venue_instance_id".to_string(),
                "eq.\"cinema:late show&more#2\"".to_string()
            )]
        );
    }

    #[test]
    fn rest_url_ignores_trailing_slash() {
        let client = client("https://example.supabase.co/");
        assert_eq!(
            client.rest_url(SEATS_TABLE),
            "https://example.supabase.co/rest/v1/venue_seats"
        );
    }

    /// PostgREST stand-in: the conditional claim wins, vacating the old seat fails
    async fn seats_patch(Query(params): Query<HashMap<String, String>>) -> Response {

        let venue = params.get("venue_instance_id").map(String::as_str);
        if venue != Some("eq.\"cinema:late show&more\"") {
            return StatusCode::BAD_REQUEST.into_response();
        }
        if params.get("occupant_id").map(String::as_str) == Some("is.null") {
            let row = SeatRow {
                venue_instance_id: "cinema:late show&more".into(),
                seat_index: 3,
                occupant_id: Some(Uuid::nil()),
                occupied_at: Some(Utc::now()),
            };
            return Json(vec![row]).into_response();
        }
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }

    #[tokio::test]
    async fn won_claim_survives_a_failed_release() {
        let app = Router::new().route("/rest/v1/venue_seats", patch(seats_patch));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let store = SupabaseWorldStore::new(client(&format!("http://{}", addr)));
        let claim = store
            .claim_seat("cinema:late show&more", 3, Uuid::nil(), Utc::now())
            .await
            .unwrap();
        assert_eq!(claim, SeatClaim::Claimed { released: None });
    }
}
