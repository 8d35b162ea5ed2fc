//! Provisioning provider trait, the signed-client adapter and an in-memory
//! implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{DataVolume, ProfileStatus, ProfileUpsert};
use provider::{
    PlaceOrderRequest, PlacedOrder, ProviderError, ProviderProfile, SignedClient,
};

/// The two provider calls the state machine depends on.
#[async_trait]
pub trait ProvisioningProvider: Send + Sync {
    /// Places an order. The request's transaction id is the idempotency key.
    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<PlacedOrder, ProviderError>;

    /// Lists the profiles delivered for a provider order so far.
    async fn query_profiles(&self, order_no: &str) -> Result<Vec<ProviderProfile>, ProviderError>;
}

#[async_trait]
impl ProvisioningProvider for SignedClient {
    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<PlacedOrder, ProviderError> {
        SignedClient::place_order(self, request).await
    }

    async fn query_profiles(&self, order_no: &str) -> Result<Vec<ProviderProfile>, ProviderError> {
        SignedClient::query_order_profiles(self, order_no).await
    }
}

/// Converts a provider-reported profile into a store upsert.
///
/// Unknown carrier statuses fall back to `GOT_RESOURCE`; unparseable
/// timestamps are dropped.
pub fn to_upsert(profile: &ProviderProfile) -> ProfileUpsert {
    let status = profile
        .esim_status
        .as_deref()
        .and_then(ProfileStatus::from_provider)
        .unwrap_or_default();

    ProfileUpsert {
        esim_tran_no: profile.esim_tran_no.clone(),
        iccid: profile.iccid.clone(),
        qr_code_url: profile.qr_code_url.clone(),
        activation_code: profile.ac.clone(),
        status,
        used_volume: DataVolume::from_bytes(profile.order_usage),
        total_volume: DataVolume::from_bytes(profile.total_volume),
        expires_at: profile.expired_time.as_deref().and_then(parse_provider_time),
        activated_at: profile.activate_time.as_deref().and_then(parse_provider_time),
    }
}

/// Parses RFC 3339 and the provider's `+0000` offset variant.
fn parse_provider_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[derive(Debug, Default)]
struct InMemoryProviderState {
    /// Package code -> data volume in bytes.
    catalog: HashMap<String, u64>,
    /// Transaction id -> provider order number.
    orders: HashMap<String, String>,
    /// Provider order number -> profiles generated at placement.
    generated: HashMap<String, Vec<ProviderProfile>>,
    /// Provider order numbers whose profiles are visible to queries.
    released: HashMap<String, bool>,
    hold_profiles: bool,
    fail_place: Option<ProviderError>,
    fail_queries: u32,
    omit_order_no: bool,
    next_order: u32,
    next_profile: u32,
    place_calls: u32,
    query_calls: u32,
}

/// In-memory provisioning provider for testing.
///
/// Orders are idempotent by transaction id. Each placed unit generates one
/// profile; profiles become visible immediately unless held.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    state: Arc<RwLock<InMemoryProviderState>>,
}

impl InMemoryProvider {
    /// Creates a new in-memory provider with an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a package the provider can fulfil.
    pub fn add_package(&self, package_code: &str, volume: DataVolume) {
        self.state
            .write()
            .unwrap()
            .catalog
            .insert(package_code.to_string(), volume.bytes());
    }

    /// Keeps generated profiles hidden from queries until released.
    pub fn set_hold_profiles(&self, hold: bool) {
        self.state.write().unwrap().hold_profiles = hold;
    }

    /// Makes the profiles of a held order visible.
    pub fn release_profiles(&self, order_no: &str) {
        self.state
            .write()
            .unwrap()
            .released
            .insert(order_no.to_string(), true);
    }

    /// Configures the service to fail every order placement with `error`.
    pub fn set_fail_place(&self, error: Option<ProviderError>) {
        self.state.write().unwrap().fail_place = error;
    }

    /// Fails the next `count` profile queries with a transport error.
    pub fn fail_next_queries(&self, count: u32) {
        self.state.write().unwrap().fail_queries = count;
    }

    /// Answers placements with a success envelope lacking an order number.
    pub fn set_omit_order_no(&self, omit: bool) {
        self.state.write().unwrap().omit_order_no = omit;
    }

    /// Overwrites the reported usage of a generated profile.
    pub fn set_usage(&self, esim_tran_no: &str, used: DataVolume) {
        let mut state = self.state.write().unwrap();
        for profile in state.generated.values_mut().flatten() {
            if profile.esim_tran_no == esim_tran_no {
                profile.order_usage = used.bytes();
            }
        }
    }

    /// Returns the profiles generated for an order, visible or not.
    pub fn profiles_for(&self, order_no: &str) -> Vec<ProviderProfile> {
        self.state
            .read()
            .unwrap()
            .generated
            .get(order_no)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the number of distinct provider orders placed.
    pub fn order_count(&self) -> usize {
        self.state.read().unwrap().orders.len()
    }

    pub fn place_calls(&self) -> u32 {
        self.state.read().unwrap().place_calls
    }

    pub fn query_calls(&self) -> u32 {
        self.state.read().unwrap().query_calls
    }
}

#[async_trait]
impl ProvisioningProvider for InMemoryProvider {
    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<PlacedOrder, ProviderError> {
        let mut state = self.state.write().unwrap();
        state.place_calls += 1;

        if let Some(error) = state.fail_place.clone() {
            return Err(error);
        }
        if state.omit_order_no {
            return Ok(PlacedOrder::default());
        }
        if let Some(order_no) = state.orders.get(&request.transaction_id) {
            return Ok(PlacedOrder {
                order_no: Some(order_no.clone()),
                transaction_id: Some(request.transaction_id.clone()),
            });
        }

        let mut profiles = Vec::new();
        for package in &request.package_info_list {
            let volume = *state.catalog.get(&package.package_code).ok_or_else(|| {
                ProviderError::Rejected {
                    code: "310241".to_string(),
                    message: format!("package {} not found", package.package_code),
                }
            })?;
            for _ in 0..package.count {
                state.next_profile += 1;
                let n = state.next_profile;
                profiles.push(ProviderProfile {
                    esim_tran_no: format!("2501{n:010}"),
                    order_no: None,
                    iccid: format!("898520{n:013}"),
                    imsi: None,
                    ac: Some(format!("LPA:1$smdp.example${n:08X}")),
                    qr_code_url: Some(format!("https://p.example/qr/{n}.png")),
                    smdp_status: Some("RELEASED".to_string()),
                    esim_status: Some("GOT_RESOURCE".to_string()),
                    total_volume: volume,
                    order_usage: 0,
                    expired_time: None,
                    activate_time: None,
                });
            }
        }

        state.next_order += 1;
        let order_no = format!("B{:014}", state.next_order);
        for profile in &mut profiles {
            profile.order_no = Some(order_no.clone());
        }
        let visible = !state.hold_profiles;
        state
            .orders
            .insert(request.transaction_id.clone(), order_no.clone());
        state.generated.insert(order_no.clone(), profiles);
        state.released.insert(order_no.clone(), visible);

        Ok(PlacedOrder {
            order_no: Some(order_no),
            transaction_id: Some(request.transaction_id.clone()),
        })
    }

    async fn query_profiles(&self, order_no: &str) -> Result<Vec<ProviderProfile>, ProviderError> {
        let mut state = self.state.write().unwrap();
        state.query_calls += 1;

        if state.fail_queries > 0 {
            state.fail_queries -= 1;
            return Err(ProviderError::Transport("connection reset".to_string()));
        }
        if !state.released.get(order_no).copied().unwrap_or(false) {
            return Ok(Vec::new());
        }
        Ok(state.generated.get(order_no).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::PackageOrder;

    fn request(transaction_id: &str, count: u32) -> PlaceOrderRequest {
        PlaceOrderRequest {
            transaction_id: transaction_id.to_string(),
            amount: None,
            package_info_list: vec![PackageOrder {
                package_code: "JP-5GB-30D".to_string(),
                count,
                price: None,
            }],
        }
    }

    fn provider() -> InMemoryProvider {
        let provider = InMemoryProvider::new();
        provider.add_package("JP-5GB-30D", DataVolume::from_gib(5));
        provider
    }

    #[tokio::test]
    async fn test_place_order_is_idempotent_by_transaction_id() {
        let provider = provider();

        let first = provider.place_order(&request("TXN1", 2)).await.unwrap();
        let second = provider.place_order(&request("TXN1", 2)).await.unwrap();

        assert_eq!(first.order_no, second.order_no);
        assert_eq!(provider.order_count(), 1);
        assert_eq!(provider.place_calls(), 2);

        let order_no = first.order_no.unwrap();
        let profiles = provider.query_profiles(&order_no).await.unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].total_volume, 5_368_709_120);
    }

    #[tokio::test]
    async fn test_unknown_package_is_rejected() {
        let provider = InMemoryProvider::new();
        let err = provider.place_order(&request("TXN1", 1)).await.unwrap_err();
        assert_eq!(err.code(), Some("310241"));
    }

    #[tokio::test]
    async fn test_held_profiles_appear_after_release() {
        let provider = provider();
        provider.set_hold_profiles(true);
        let order_no = provider
            .place_order(&request("TXN1", 1))
            .await
            .unwrap()
            .order_no
            .unwrap();

        assert!(provider.query_profiles(&order_no).await.unwrap().is_empty());
        provider.release_profiles(&order_no);
        assert_eq!(provider.query_profiles(&order_no).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_queries() {
        let provider = provider();
        provider.fail_next_queries(1);
        assert!(provider.query_profiles("B1").await.is_err());
        assert!(provider.query_profiles("B1").await.unwrap().is_empty());
    }

    #[test]
    fn test_to_upsert_maps_fields() {
        let profile = ProviderProfile {
            esim_tran_no: "T1".to_string(),
            order_no: Some("B1".to_string()),
            iccid: "8985".to_string(),
            imsi: None,
            ac: Some("LPA:1$smdp$X".to_string()),
            qr_code_url: None,
            smdp_status: None,
            esim_status: Some("IN_USE".to_string()),
            total_volume: 1000,
            order_usage: 250,
            expired_time: Some("2025-02-01T00:00:00+0000".to_string()),
            activate_time: Some("not a time".to_string()),
        };

        let upsert = to_upsert(&profile);
        assert_eq!(upsert.status, ProfileStatus::InUse);
        assert_eq!(upsert.activation_code.as_deref(), Some("LPA:1$smdp$X"));
        assert_eq!(upsert.used_volume.bytes(), 250);
        assert!(upsert.expires_at.is_some());
        assert!(upsert.activated_at.is_none());
    }
}
