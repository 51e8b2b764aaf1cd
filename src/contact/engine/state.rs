use crate::contact::domain::{AnonymousData, ContactIdInfo, IdentityState};
use crate::contact::token::AuthTokenCache;

#[derive(Debug, Clone)]
pub struct EngineState {
    /// Last identity confirmed by the backend (or generated locally).
    pub identity: Option<IdentityState>,

    /// Only meaningful while `identity` is anonymous.
    pub anon_data: Option<AnonymousData>,

    pub tokens: AuthTokenCache,

    /// Last published projections, for deduplication.
    pub last_contact_id_update: Option<ContactIdInfo>,
    pub last_named_user_update: Option<String>,
}

impl EngineState {
    pub fn has_anon_data(&self) -> bool {
        let anonymous = self.identity.as_ref().is_some_and(|i| i.is_anonymous);
        anonymous && self.anon_data.as_ref().is_some_and(|d| !d.is_empty())
    }

    pub fn contact_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.contact_id.as_str())
    }
}
