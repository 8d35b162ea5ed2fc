//! Wire types of the provisioning API.
//!
//! Field names follow the provider's camelCase JSON. Prices are integers in
//! the provider's own minor unit; volumes are bytes.

use serde::{Deserialize, Serialize};

/// Every provisioning endpoint the client can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    PackageList,
    Order,
    Query,
    Cancel,
    Suspend,
    Unsuspend,
    Revoke,
    BalanceQuery,
    TopUp,
    WebhookSave,
    WebhookQuery,
    SendSms,
    Usage,
}

impl Endpoint {
    /// Path relative to the API root.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::PackageList => "package/list",
            Endpoint::Order => "esim/order",
            Endpoint::Query => "esim/query",
            Endpoint::Cancel => "esim/cancel",
            Endpoint::Suspend => "esim/suspend",
            Endpoint::Unsuspend => "esim/unsuspend",
            Endpoint::Revoke => "esim/revoke",
            Endpoint::BalanceQuery => "balance/query",
            Endpoint::TopUp => "esim/topup",
            Endpoint::WebhookSave => "webhook/save",
            Endpoint::WebhookQuery => "webhook/query",
            Endpoint::SendSms => "esim/sendSms",
            Endpoint::Usage => "esim/usage",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Response envelope shared by all endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub obj: serde_json::Value,
}

/// Empty request body.
#[derive(Debug, Default, Serialize)]
pub struct Empty {}

// -- Packages --

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_code: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub package_code: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub name: String,
    pub price: i64,
    #[serde(default)]
    pub currency_code: Option<String>,
    pub volume: u64,
    pub duration: u32,
    pub duration_unit: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageList {
    #[serde(default)]
    pub package_list: Vec<Package>,
}

// -- Orders --

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageOrder {
    pub package_code: String,
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
}

/// Body of `esim/order`. `transaction_id` is the provider's idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    pub package_info_list: Vec<PackageOrder>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    #[serde(default)]
    pub order_no: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

// -- Profiles --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pager {
    pub page_num: u32,
    pub page_size: u32,
}

impl Default for Pager {
    fn default() -> Self {
        Self {
            page_num: 1,
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub esim_tran_no: Option<String>,
    pub pager: Pager,
}

impl ProfileQuery {
    /// First page of an order's profiles.
    pub fn by_order_no(order_no: impl Into<String>) -> Self {
        Self {
            order_no: Some(order_no.into()),
            ..Default::default()
        }
    }
}

/// One eSIM profile as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProfile {
    pub esim_tran_no: String,
    #[serde(default)]
    pub order_no: Option<String>,
    pub iccid: String,
    #[serde(default)]
    pub imsi: Option<String>,

    /// LPA activation code.
    #[serde(default)]
    pub ac: Option<String>,
    #[serde(default)]
    pub qr_code_url: Option<String>,
    #[serde(default)]
    pub smdp_status: Option<String>,
    #[serde(default)]
    pub esim_status: Option<String>,
    #[serde(default)]
    pub total_volume: u64,

    /// Bytes consumed so far.
    #[serde(default)]
    pub order_usage: u64,
    #[serde(default)]
    pub expired_time: Option<String>,
    #[serde(default)]
    pub activate_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePage {
    #[serde(default)]
    pub esim_list: Vec<ProviderProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRef {
    pub esim_tran_no: String,
}

// -- Balance & top-up --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Balance {
    pub balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpRequest {
    pub esim_tran_no: String,
    pub package_code: String,
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpResult {
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub iccid: Option<String>,
    #[serde(default)]
    pub expired_time: Option<String>,
    #[serde(default)]
    pub total_volume: u64,
    #[serde(default)]
    pub order_usage: u64,
}

// -- Webhook registration --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    #[serde(default)]
    pub webhook: Option<String>,
}

// -- SMS & usage --

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsRequest {
    pub esim_tran_no: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageQuery {
    pub esim_tran_no_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUsage {
    pub esim_tran_no: String,
    pub data_usage: u64,
    pub total_data: u64,
    #[serde(default)]
    pub last_update_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageList {
    #[serde(default)]
    pub esim_usage_list: Vec<ProfileUsage>,
}
