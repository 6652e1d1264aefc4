//! Mapping a verified identity onto a local account.

use gapps_auth_store::{AccountStore, LocalAccount};
use tracing::{info, instrument};

use crate::error::Result;
use crate::session::{AuthenticatedUser, SessionStore};

/// An identity the provider vouched for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Verified email address.
    pub email: String,
    /// Display name.
    pub name: String,
}

/// Finds or creates the local account for a verified identity and logs the
/// browser in as it.
#[derive(Clone)]
pub struct AccountReconciler {
    accounts: AccountStore,
}

impl AccountReconciler {
    /// Create a reconciler that writes accounts through `accounts`.
    pub fn new(accounts: AccountStore) -> Self {
        Self { accounts }
    }

    /// Reconcile `identity` with the account store.
    ///
    /// Safe to run concurrently for the same email: the store's uniqueness
    /// constraint guarantees a single account. The account is marked as
    /// remembered and recorded in the session as the logged-in user.
    #[instrument(skip(self, session), fields(email = %identity.email))]
    pub async fn reconcile(
        &self,
        identity: &VerifiedIdentity,
        session: &mut SessionStore<'_>,
    ) -> Result<LocalAccount> {
        let (mut account, created) = self
            .accounts
            .find_or_create(&identity.email, &identity.name)
            .await?;
        if created {
            info!(account_id = %account.id, "created local account");
        }

        if !account.remember_login {
            self.accounts.set_remember_login(&account.id, true).await?;
            account.remember_login = true;
        }

        session.set_authenticated(&AuthenticatedUser {
            account_id: account.id.clone(),
            email: account.email.clone(),
            remember: account.remember_login,
        })?;

        Ok(account)
    }
}
