//! Per-request caller identity and locale context

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::jwt::Claims;
use crate::utils::{ApiError, ApiResult};

/// Supported interaction locales
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ar,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ar => "ar",
        }
    }

    /// Lenient claim parsing: `ar`, `ar-SA`, `ar_EG` all map to Arabic;
    /// anything else defaults to English.
    pub fn parse_lenient(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        if lower == "ar" || lower.starts_with("ar-") || lower.starts_with("ar_") {
            Self::Ar
        } else {
            Self::En
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarSystem {
    #[default]
    Gregorian,
    Hijri,
}

impl CalendarSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gregorian => "gregorian",
            Self::Hijri => "hijri",
        }
    }
}

/// Validated caller context, built once per request at the auth boundary and
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub tenant_id: String,
    pub session_id: Option<Uuid>,
    pub locale: Locale,
    pub timezone: String,
    pub calendar: CalendarSystem,
    pub roles: BTreeSet<String>,
    pub cost_centres: BTreeSet<String>,
    pub request_id: Uuid,
    pub trace_id: Uuid,
}

impl UserContext {
    pub fn from_claims(claims: &Claims) -> ApiResult<Self> {
        if claims.sub.trim().is_empty() {
            return Err(ApiError::unauthorized("Token is missing a subject"));
        }
        if claims.tenant_id.trim().is_empty() {
            return Err(ApiError::unauthorized("Token is missing a tenant"));
        }

        let locale = claims
            .locale
            .as_deref()
            .map(Locale::parse_lenient)
            .unwrap_or_default();
        let calendar = match claims.calendar_system.as_deref() {
            Some("hijri") => CalendarSystem::Hijri,
            _ => CalendarSystem::Gregorian,
        };

        Ok(Self {
            user_id: claims.sub.clone(),
            tenant_id: claims.tenant_id.clone(),
            session_id: None,
            locale,
            timezone: claims
                .zoneinfo
                .clone()
                .unwrap_or_else(|| "UTC".to_string()),
            calendar,
            roles: claims.realm_access.roles.iter().cloned().collect(),
            cost_centres: claims.cost_centres.iter().cloned().collect(),
            request_id: Uuid::new_v4(),
            trace_id: Uuid::new_v4(),
        })
    }

    /// Bind the request-level overrides (resolved session, body-declared
    /// locale) producing the final context the pipeline runs under.
    pub fn for_request(&self, session_id: Uuid, declared_locale: Option<Locale>) -> Self {
        let mut ctx = self.clone();
        ctx.session_id = Some(session_id);
        if let Some(locale) = declared_locale {
            ctx.locale = locale;
        }
        ctx
    }
}
