use serde::Deserialize;

/// Administrative region reported in the form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Region {
    /// Concatenated region name, e.g. `"安徽省合肥市蜀山区"`.
    pub name: String,
    /// Most specific region code, e.g. `"340104"`.
    pub code: String,
}

/// One configured portal account. Owned by configuration, read-only here.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    #[serde(rename = "account-id")]
    pub account_id: String,
    pub password: String,
    pub region: Region,
}

/// Terminal result of one account's submission job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    /// Login never completed within the ceiling. Per-account, non-fatal.
    LoginFailed,
    /// The page's inline script drifted from the baseline. Global, fatal.
    PageChanged,
    /// The portal's acknowledgment was not a success. Per-account,
    /// non-fatal, never retried automatically.
    SubmitFailed,
    Errored(String),
}
