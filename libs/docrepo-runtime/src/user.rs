/// Ambient identity of the caller, used only to attribute audit records.
pub trait UserContext: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// No user; audit records carry no `userId`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousUser;

impl UserContext for AnonymousUser {
    fn current_user_id(&self) -> Option<String> {
        None
    }
}

/// Fixed user, for service accounts and tests.
#[derive(Clone, Debug)]
pub struct StaticUser(pub String);

impl UserContext for StaticUser {
    fn current_user_id(&self) -> Option<String> {
        Some(self.0.clone())
    }
}
