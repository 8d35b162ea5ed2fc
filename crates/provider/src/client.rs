use std::sync::Arc;
use std::time::Instant;

use reqwest::{StatusCode, header::CONTENT_TYPE};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    ProviderConfig, ProviderError, Result,
    signing::{
        ACCESS_CODE_HEADER, REQUEST_ID_HEADER, SIGNATURE_HEADER, SignedHeaders, TIMESTAMP_HEADER,
    },
    types::{
        Balance, Empty, Endpoint, Envelope, PackageList, PackageQuery, PlaceOrderRequest,
        PlacedOrder, ProfilePage, ProfileQuery, ProfileRef, ProviderProfile, SmsRequest,
        TopUpRequest, TopUpResult, UsageList, UsageQuery, WebhookRegistration,
    },
};

/// Prefix of every endpoint path.
const API_ROOT: &str = "api/v1/open";

/// Most pages `query_order_profiles` reads for one order.
const MAX_PROFILE_PAGES: u32 = 100;

/// Authenticated client for the provisioning API.
///
/// Every request is signed with a fresh request id and timestamp. The client
/// never retries: a blind retry of `esim/order` could place a second order.
#[derive(Debug, Clone)]
pub struct SignedClient {
    http: reqwest::Client,
    config: Arc<ProviderConfig>,
}

impl SignedClient {
    /// Creates a client from explicit configuration.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Sends one signed call and unwraps the response envelope.
    #[tracing::instrument(skip(self, endpoint, payload), fields(endpoint = %endpoint))]
    pub async fn call<Req, T>(&self, endpoint: Endpoint, payload: &Req) -> Result<T>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let started = Instant::now();
        let result = self.send(endpoint, payload).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(ProviderError::Auth(_)) => "auth_error",
            Err(ProviderError::Rejected { .. }) => "rejected",
            Err(ProviderError::Transport(_)) => "transport_error",
        };
        metrics::counter!(
            "provider_requests_total",
            "endpoint" => endpoint.path(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("provider_request_duration_seconds", "endpoint" => endpoint.path())
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            tracing::warn!(error = %e, "provider call failed");
        }
        result
    }

    async fn send<Req, T>(&self, endpoint: Endpoint, payload: &Req) -> Result<T>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_vec(payload)
            .map_err(|e| ProviderError::Transport(format!("failed to encode request: {e}")))?;
        let headers =
            SignedHeaders::generate(&self.config.secret_key, &self.config.access_code, &body)
                .map_err(|_| ProviderError::Auth("secret key cannot be used for HMAC".to_string()))?;

        let url = format!("{}/{API_ROOT}/{}", self.config.base_url, endpoint.path());
        tracing::debug!(%url, request_id = %headers.request_id, "sending provider request");

        let response = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCESS_CODE_HEADER, &self.config.access_code)
            .header(REQUEST_ID_HEADER, &headers.request_id)
            .header(TIMESTAMP_HEADER, &headers.timestamp)
            .header(SIGNATURE_HEADER, &headers.signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProviderError::Auth(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(ProviderError::Transport(format!("unexpected HTTP {status}")));
        }

        let bytes = response.bytes().await?;
        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::Transport(format!("invalid response envelope: {e}")))?;

        if !envelope.success {
            return Err(ProviderError::Rejected {
                code: envelope.error_code.unwrap_or_else(|| "UNKNOWN".to_string()),
                message: envelope.error_msg.unwrap_or_default(),
            });
        }

        // A null `obj` decodes as an empty object for struct payloads, so
        // list endpoints with nothing to report yield empty lists.
        let obj = envelope.obj;
        if obj.is_null()
            && let Ok(value) = serde_json::from_value(serde_json::Value::Null)
        {
            return Ok(value);
        }
        let obj = if obj.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            obj
        };
        serde_json::from_value(obj)
            .map_err(|e| ProviderError::Transport(format!("invalid response payload: {e}")))
    }

    // -- Typed endpoints --

    pub async fn list_packages(&self, query: &PackageQuery) -> Result<PackageList> {
        self.call(Endpoint::PackageList, query).await
    }

    pub async fn place_order(&self, request: &PlaceOrderRequest) -> Result<PlacedOrder> {
        self.call(Endpoint::Order, request).await
    }

    /// Reads one page of profiles.
    pub async fn query_profiles(&self, query: &ProfileQuery) -> Result<ProfilePage> {
        self.call(Endpoint::Query, query).await
    }

    /// Reads every profile of a provider order, one page at a time, until a
    /// page comes back short.
    #[tracing::instrument(skip(self))]
    pub async fn query_order_profiles(&self, order_no: &str) -> Result<Vec<ProviderProfile>> {
        let mut query = ProfileQuery::by_order_no(order_no);
        let mut profiles = Vec::new();

        loop {
            let page = self.query_profiles(&query).await?;
            let fetched = page.esim_list.len();
            profiles.extend(page.esim_list);

            if fetched < query.pager.page_size as usize {
                break;
            }
            if query.pager.page_num >= MAX_PROFILE_PAGES {
                tracing::warn!(
                    pages = query.pager.page_num,
                    profiles = profiles.len(),
                    "profile page limit reached"
                );
                break;
            }
            query.pager.page_num += 1;
        }

        Ok(profiles)
    }

    pub async fn cancel_profile(&self, esim_tran_no: &str) -> Result<()> {
        self.profile_action(Endpoint::Cancel, esim_tran_no).await
    }

    pub async fn suspend_profile(&self, esim_tran_no: &str) -> Result<()> {
        self.profile_action(Endpoint::Suspend, esim_tran_no).await
    }

    pub async fn unsuspend_profile(&self, esim_tran_no: &str) -> Result<()> {
        self.profile_action(Endpoint::Unsuspend, esim_tran_no).await
    }

    pub async fn revoke_profile(&self, esim_tran_no: &str) -> Result<()> {
        self.profile_action(Endpoint::Revoke, esim_tran_no).await
    }

    pub async fn query_balance(&self) -> Result<Balance> {
        self.call(Endpoint::BalanceQuery, &Empty::default()).await
    }

    pub async fn top_up(&self, request: &TopUpRequest) -> Result<TopUpResult> {
        self.call(Endpoint::TopUp, request).await
    }

    /// Registers the URL the provider should deliver webhooks to.
    pub async fn save_webhook(&self, url: &str) -> Result<()> {
        let registration = WebhookRegistration {
            webhook: Some(url.to_string()),
        };
        self.ignore_obj(Endpoint::WebhookSave, &registration).await
    }

    pub async fn query_webhook(&self) -> Result<WebhookRegistration> {
        self.call(Endpoint::WebhookQuery, &Empty::default()).await
    }

    pub async fn send_sms(&self, esim_tran_no: &str, message: &str) -> Result<()> {
        let request = SmsRequest {
            esim_tran_no: esim_tran_no.to_string(),
            message: message.to_string(),
        };
        self.ignore_obj(Endpoint::SendSms, &request).await
    }

    pub async fn query_usage(&self, esim_tran_nos: &[String]) -> Result<UsageList> {
        let query = UsageQuery {
            esim_tran_no_list: esim_tran_nos.to_vec(),
        };
        self.call(Endpoint::Usage, &query).await
    }

    async fn profile_action(&self, endpoint: Endpoint, esim_tran_no: &str) -> Result<()> {
        let reference = ProfileRef {
            esim_tran_no: esim_tran_no.to_string(),
        };
        self.ignore_obj(endpoint, &reference).await
    }

    /// Calls an endpoint whose `obj` carries nothing the caller needs.
    async fn ignore_obj<Req: Serialize + ?Sized>(
        &self,
        endpoint: Endpoint,
        payload: &Req,
    ) -> Result<()> {
        self.call::<_, serde_json::Value>(endpoint, payload)
            .await
            .map(|_| ())
    }
}
