//! Who is acting on the vault.
//!
//! The access log records an actor id for every row. The vault does not
//! authenticate users itself; it asks an [`IdentityProvider`] supplied by
//! the host application.

/// Source of the current actor id.
pub trait IdentityProvider: Send + Sync {
    fn actor_id(&self) -> String;
}

/// A fixed actor, for single-user installs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity(String);

impl StaticIdentity {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self(actor_id.into())
    }
}

impl IdentityProvider for StaticIdentity {
    fn actor_id(&self) -> String {
        self.0.clone()
    }
}

impl<F> IdentityProvider for F
where
    F: Fn() -> String + Send + Sync,
{
    fn actor_id(&self) -> String {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_identity() {
        let identity = StaticIdentity::new("manager-7");
        assert_eq!(identity.actor_id(), "manager-7");
    }

    #[test]
    fn test_closure_identity() {
        let identity = || "front-desk".to_string();
        assert_eq!(IdentityProvider::actor_id(&identity), "front-desk");
    }
}
