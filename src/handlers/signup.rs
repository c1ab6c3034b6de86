//! Join and check flows.
//!
//! Every request is gated by the rate limiter before anything else happens.
//! A permitted join then inserts the member; a repeat signup with a known
//! email is logged and answered exactly like a fresh one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::RateLimitConfig;
use crate::storage::{Action, JoinError, MemberStore, RateLimiter, Result, ValidationError};

/// Form field carrying the member's email.
pub const EMAIL_FIELD: &str = "email";
/// Form field carrying the member's name.
pub const NAME_FIELD: &str = "name";
/// Form field carrying the requested shirt size.
pub const SHIRT_SIZE_FIELD: &str = "shirt-size";

/// Decoded join form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinForm {
    pub email: String,
    pub name: String,
    pub shirt_size: String,
}

impl JoinForm {
    /// Build from decoded form fields; exactly `email`, `name` and
    /// `shirt-size` must be present, each once.
    pub fn from_fields<K, V, I>(fields: I) -> std::result::Result<Self, ValidationError>
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut decoded: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in fields {
            let key = key.into();
            if decoded.contains_key(&key) {
                return Err(ValidationError::DuplicateFormField(key));
            }
            decoded.insert(key, value.into());
        }
        let mut fields = decoded;

        let mut take = |name: &str| {
            fields
                .remove(name)
                .ok_or_else(|| ValidationError::MissingFormField(name.to_string()))
        };
        let email = take(EMAIL_FIELD)?;
        let name = take(NAME_FIELD)?;
        let shirt_size = take(SHIRT_SIZE_FIELD)?;

        if let Some(extra) = fields.into_keys().next() {
            return Err(ValidationError::UnexpectedFormField(extra));
        }

        Ok(Self {
            email,
            name,
            shirt_size,
        })
    }
}

/// Terminal result of a join or check request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Accepted,
    RateLimited,
}

/// Rate-limited join/check handling over the two stores.
#[derive(Clone)]
pub struct SignupService {
    limiter: RateLimiter,
    members: MemberStore,
    limits: RateLimitConfig,
}

impl SignupService {
    pub fn new(limiter: RateLimiter, members: MemberStore, limits: RateLimitConfig) -> Self {
        Self {
            limiter,
            members,
            limits,
        }
    }

    pub fn members(&self) -> &MemberStore {
        &self.members
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Dispatch a request by action name (`join` or `check`).
    pub async fn handle<K, V, I>(&self, action: &str, fields: I) -> Result<ActionOutcome>
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        match action.parse::<Action>()? {
            Action::Join => {
                let form = JoinForm::from_fields(fields)?;
                self.join(&form).await
            }
            Action::Check => self.check().await,
        }
    }

    pub async fn join(&self, form: &JoinForm) -> Result<ActionOutcome> {
        self.join_at(form, Utc::now()).await
    }

    /// Gate, then insert. A duplicate email is swallowed here.
    pub async fn join_at(&self, form: &JoinForm, now: DateTime<Utc>) -> Result<ActionOutcome> {
        if !self.permit(Action::Join, now).await? {
            return Ok(ActionOutcome::RateLimited);
        }

        match self
            .members
            .join(&form.email, &form.name, &form.shirt_size, now)
            .await
        {
            Ok(()) => {
                info!(email = %form.email, "New member signed up");
                Ok(ActionOutcome::Accepted)
            }
            Err(JoinError::DuplicateEmail { email }) => {
                info!(email = %email, "Duplicate signup ignored");
                Ok(ActionOutcome::Accepted)
            }
            Err(JoinError::Storage(e)) => Err(e),
        }
    }

    pub async fn check(&self) -> Result<ActionOutcome> {
        self.check_at(Utc::now()).await
    }

    pub async fn check_at(&self, now: DateTime<Utc>) -> Result<ActionOutcome> {
        if self.permit(Action::Check, now).await? {
            Ok(ActionOutcome::Accepted)
        } else {
            Ok(ActionOutcome::RateLimited)
        }
    }

    async fn permit(&self, action: Action, now: DateTime<Utc>) -> Result<bool> {
        self.limiter
            .try_action_at(action, self.limits.max_for(action), now)
            .await
    }
}
