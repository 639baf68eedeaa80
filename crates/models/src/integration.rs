use crate::errors::ConfigError;
use crate::id::IntegrationId;
use crate::schedule::Schedule;
use crate::sync::LastSync;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Replacement for secret values in read paths.
pub const SECRET_MASK: &str = "••••••";

/// One configured external feed, as persisted in the primary store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    pub id: IntegrationId,
    pub name: String,
    #[serde(flatten)]
    pub kind: IntegrationKind,
    pub schedule: Schedule,
    #[serde(default)]
    pub options: SyncOptions,
    #[serde(default)]
    pub status: IntegrationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<LastSync>,
    #[serde(default)]
    pub stats: IntegrationStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The admin-supplied portion of an integration, before the engine assigns
/// identity and bookkeeping fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationDraft {
    pub name: String,
    #[serde(flatten)]
    pub kind: IntegrationKind,
    pub schedule: Schedule,
    #[serde(default)]
    pub options: SyncOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl IntegrationDraft {
    /// Validates the draft, rejecting anything the sync engine could not
    /// act on later. Nothing is persisted by this call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField("name"));
        }
        self.kind.validate()?;
        self.schedule.validate()?;
        Ok(())
    }

    pub fn into_integration(self, now: DateTime<Utc>) -> Integration {
        Integration {
            id: IntegrationId::new(),
            name: self.name,
            kind: self.kind,
            schedule: self.schedule,
            options: self.options,
            status: IntegrationStatus::Active,
            last_sync: None,
            stats: IntegrationStats::default(),
            created_by: self.created_by,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Integration {
    /// A copy safe to serialize on read paths: every secret is masked.
    pub fn safe_view(&self) -> Integration {
        let mut view = self.clone();
        match &mut view.kind {
            IntegrationKind::Ftp(cfg) => {
                cfg.password = SECRET_MASK.to_string();
            }
            IntegrationKind::HttpApi(cfg) => cfg.auth.mask(),
            IntegrationKind::Spreadsheet(_) => {}
        }
        view
    }

    pub fn is_syncing(&self) -> bool {
        self.status == IntegrationStatus::Syncing
    }
}

/// Kind-specific feed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IntegrationKind {
    Ftp(FtpConfig),
    HttpApi(HttpApiConfig),
    Spreadsheet(SpreadsheetConfig),
}

impl IntegrationKind {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            IntegrationKind::Ftp(cfg) => cfg.validate(),
            IntegrationKind::HttpApi(cfg) => cfg.validate(),
            IntegrationKind::Spreadsheet(cfg) => cfg.validate(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FtpProtocol {
    Ftp,
    Sftp,
}

impl Default for FtpProtocol {
    fn default() -> Self {
        FtpProtocol::Ftp
    }
}

/// Connection settings for an FTP, FTPS or SFTP feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpConfig {
    pub host: String,
    #[serde(default = "FtpConfig::default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Listing base on the remote server. Empty means the login directory.
    #[serde(default)]
    pub remote_path: String,
    /// Filename glob; `*` and `?` only, matched case-insensitively.
    #[serde(default = "FtpConfig::default_pattern")]
    pub file_pattern: String,
    /// Explicit FTPS. Ignored for SFTP, which is always encrypted.
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub protocol: FtpProtocol,
    #[serde(default = "FtpConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl FtpConfig {
    fn default_port() -> u16 {
        21
    }
    fn default_pattern() -> String {
        "*.csv".to_string()
    }
    fn default_timeout_secs() -> u64 {
        30
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingField("host"));
        }
        if self.host.contains('/') || self.host.contains(' ') {
            return Err(ConfigError::InvalidHost {
                host: self.host.clone(),
            });
        }
        validate_pattern(&self.file_pattern)?;
        Ok(())
    }
}

/// Connection settings for a REST API feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub auth: ApiAuth,
    /// Endpoint paths polled for records, relative to `base_url`.
    pub endpoints: Vec<String>,
    /// Dot path into each response selecting the record array. Empty means
    /// the body itself is the array.
    #[serde(default)]
    pub data_path: String,
    #[serde(default)]
    pub pagination: Pagination,
    /// Maximum requests per second, enforced with a token bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    #[serde(default = "HttpApiConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Source field path → canonical Part field.
    #[serde(default)]
    pub field_mapping: BTreeMap<String, String>,
}

impl HttpApiConfig {
    fn default_timeout_secs() -> u64 {
        30
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.base_url).map_err(|err| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            detail: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                detail: format!("unsupported scheme {:?}", parsed.scheme()),
            });
        }
        if self.endpoints.is_empty() {
            return Err(ConfigError::MissingField("endpoints"));
        }
        if let Some(0) = self.rate_limit {
            return Err(ConfigError::OutOfRange {
                field: "rateLimit",
                min: 1,
                max: i64::MAX,
                value: 0,
            });
        }
        Ok(())
    }
}

/// How API credentials are attached to each request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ApiAuth {
    None,
    #[serde(rename_all = "camelCase")]
    ApiKey {
        #[serde(default = "default_api_key_header")]
        header: String,
        key: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
    #[serde(rename_all = "camelCase")]
    OAuth2ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
    },
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

impl Default for ApiAuth {
    fn default() -> Self {
        ApiAuth::None
    }
}

impl ApiAuth {
    fn mask(&mut self) {
        match self {
            ApiAuth::None => {}
            ApiAuth::ApiKey { key, .. } => *key = SECRET_MASK.to_string(),
            ApiAuth::Basic { password, .. } => *password = SECRET_MASK.to_string(),
            ApiAuth::Bearer { token } => *token = SECRET_MASK.to_string(),
            ApiAuth::OAuth2ClientCredentials { client_secret, .. } => {
                *client_secret = SECRET_MASK.to_string()
            }
        }
    }
}

/// How additional record pages are requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Pagination {
    None,
    #[serde(rename_all = "camelCase")]
    Page {
        #[serde(default = "default_page_param")]
        param: String,
        #[serde(default = "default_page_size")]
        page_size: u32,
    },
    #[serde(rename_all = "camelCase")]
    Offset {
        #[serde(default = "default_offset_param")]
        offset_param: String,
        #[serde(default = "default_limit_param")]
        limit_param: String,
        #[serde(default = "default_page_size")]
        page_size: u32,
    },
    #[serde(rename_all = "camelCase")]
    Cursor {
        /// Dot path in the response body holding the next cursor.
        cursor_path: String,
        /// Query parameter carrying the cursor on the next request.
        cursor_param: String,
    },
    /// RFC 5988 `Link: <...>; rel="next"`.
    LinkHeader,
}

fn default_page_param() -> String {
    "page".to_string()
}
fn default_offset_param() -> String {
    "offset".to_string()
}
fn default_limit_param() -> String {
    "limit".to_string()
}
fn default_page_size() -> u32 {
    100
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::None
    }
}

/// Settings for feeds whose files are uploaded to a local directory rather
/// than pulled over the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetConfig {
    pub directory: String,
    #[serde(default = "FtpConfig::default_pattern")]
    pub file_pattern: String,
}

impl SpreadsheetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directory.trim().is_empty() {
            return Err(ConfigError::MissingField("directory"));
        }
        validate_pattern(&self.file_pattern)?;
        Ok(())
    }
}

fn validate_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.trim().is_empty() {
        return Err(ConfigError::MissingField("filePattern"));
    }
    glob::Pattern::new(pattern).map_err(|err| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        detail: err.to_string(),
    })?;
    Ok(())
}

/// Per-integration sync behavior toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    /// Kick off a sync immediately after the integration is created.
    #[serde(default)]
    pub auto_sync: bool,
    /// Skip the cleaning phase and upsert into the existing part set.
    #[serde(default)]
    pub delta_sync: bool,
    #[serde(default)]
    pub retry_on_fail: bool,
    #[serde(default = "SyncOptions::default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl SyncOptions {
    fn default_max_retries() -> u32 {
        3
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            auto_sync: false,
            delta_sync: false,
            retry_on_fail: false,
            max_retries: Self::default_max_retries(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Whether a run with some failed files still counts as a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailurePolicy {
    /// The run succeeds if at least one file succeeded; failures are
    /// reported on the outcome.
    SucceedWithErrors,
    /// Any failed file fails the whole run.
    FailOnAnyFile,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::SucceedWithErrors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Active,
    Inactive,
    Syncing,
    Error,
}

impl Default for IntegrationStatus {
    fn default() -> Self {
        IntegrationStatus::Active
    }
}

/// Rolling per-integration counters, updated after every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStats {
    pub total_records: u64,
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub last_sync_records: u64,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schedule::Frequency;

    fn ftp_draft() -> IntegrationDraft {
        IntegrationDraft {
            name: "Acme FTP".to_string(),
            kind: IntegrationKind::Ftp(FtpConfig {
                host: "ftp.acme.test".to_string(),
                port: 21,
                username: "parts".to_string(),
                password: "hunter2".to_string(),
                remote_path: "/exports".to_string(),
                file_pattern: "*.csv".to_string(),
                secure: false,
                protocol: FtpProtocol::Ftp,
                timeout_secs: 30,
            }),
            schedule: Schedule {
                enabled: true,
                frequency: Frequency::Hourly,
                timezone: "UTC".to_string(),
            },
            options: SyncOptions::default(),
            created_by: Some("admin".to_string()),
        }
    }

    #[test]
    fn draft_validation_accepts_a_complete_ftp_config() {
        ftp_draft().validate().expect("draft should validate");
    }

    #[test]
    fn draft_validation_rejects_missing_host() {
        let mut draft = ftp_draft();
        let IntegrationKind::Ftp(cfg) = &mut draft.kind else {
            unreachable!()
        };
        cfg.host = "  ".to_string();
        assert!(matches!(
            draft.validate(),
            Err(ConfigError::MissingField("host"))
        ));
    }

    #[test]
    fn draft_validation_rejects_bad_pattern() {
        let mut draft = ftp_draft();
        let IntegrationKind::Ftp(cfg) = &mut draft.kind else {
            unreachable!()
        };
        cfg.file_pattern = "[".to_string();
        assert!(matches!(
            draft.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn api_validation_rejects_non_http_urls() {
        let cfg = HttpApiConfig {
            base_url: "ftp://api.acme.test".to_string(),
            auth: ApiAuth::None,
            endpoints: vec!["/parts".to_string()],
            data_path: String::new(),
            pagination: Pagination::None,
            rate_limit: None,
            timeout_secs: 30,
            field_mapping: BTreeMap::new(),
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn safe_view_masks_every_secret() {
        let now = Utc::now();
        let integration = ftp_draft().into_integration(now);
        let view = integration.safe_view();
        let IntegrationKind::Ftp(cfg) = &view.kind else {
            unreachable!()
        };
        assert_eq!(cfg.password, SECRET_MASK);
        // The original is untouched.
        let IntegrationKind::Ftp(cfg) = &integration.kind else {
            unreachable!()
        };
        assert_eq!(cfg.password, "hunter2");

        let rendered = serde_json::to_string(&view).unwrap();
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn integration_kind_serializes_with_a_kind_tag() {
        let now = Utc::now();
        let integration = ftp_draft().into_integration(now);
        let value = serde_json::to_value(&integration).unwrap();
        assert_eq!(value["kind"], "ftp");
        let back: Integration = serde_json::from_value(value).unwrap();
        assert_eq!(back, integration);
    }
}
