use crate::{
    error::{
        GameError,
        Result,
    },
    game::Account,
};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{
    info,
    warn,
};

/// Wallet capability: account discovery and authorization.
///
/// The absence of a wallet is modelled by the tracker holding no
/// environment at all, which keeps it distinct from a wallet that reports
/// zero authorized accounts.
pub trait WalletEnvironment {
    /// Accounts already authorized for this client, without prompting.
    fn list_authorized_accounts(&self) -> impl Future<Output = Result<Vec<Account>>>;

    /// Prompt the user to authorize an account.
    fn request_authorization(&self) -> impl Future<Output = Result<Vec<Account>>>;

    /// Stream of authorized-account sets, emitted whenever they change.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<Account>>;
}

/// Owner of the single "current account".
pub struct IdentityTracker<W> {
    wallet: Option<W>,
    changes: Option<mpsc::UnboundedReceiver<Vec<Account>>>,
    current: Option<Account>,
}

impl<W: WalletEnvironment> IdentityTracker<W> {
    pub fn new(wallet: Option<W>) -> Self {
        let changes = wallet.as_ref().map(WalletEnvironment::subscribe);
        Self {
            wallet,
            changes,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&Account> {
        self.current.as_ref()
    }

    pub fn has_wallet(&self) -> bool {
        self.wallet.is_some()
    }

    /// Adopts an already-authorized account, if any. Never fails: a missing
    /// wallet or a failed query both yield `None`.
    pub async fn probe_existing_session(&mut self) -> Option<Account> {
        let wallet = self.wallet.as_ref()?;
        match wallet.list_authorized_accounts().await {
            Ok(accounts) => {
                let found = accounts.first().copied();
                if found.is_some() {
                    self.adopt(found);
                }
                found
            }
            Err(err) => {
                warn!(%err, "probing wallet for an existing session failed");
                None
            }
        }
    }

    pub async fn request_connection(&mut self) -> Result<Account> {
        let wallet = self.wallet.as_ref().ok_or(GameError::WalletUnavailable)?;
        let accounts = wallet.request_authorization().await?;
        let account = accounts.first().copied().ok_or_else(|| {
            GameError::UserRejected("wallet authorized no accounts".to_string())
        })?;
        self.adopt(Some(account));
        Ok(account)
    }

    /// Waits for the next notification that actually changes the current
    /// account and returns the new value. Pends forever without a wallet.
    pub async fn next_change(&mut self) -> Option<Account> {
        loop {
            let next = match self.changes.as_mut() {
                Some(rx) => match rx.recv().await {
                    Some(accounts) => accounts.first().copied(),
                    None => {
                        warn!("wallet stopped publishing account changes");
                        self.changes = None;
                        continue;
                    }
                },
                None => std::future::pending().await,
            };
            if self.adopt(next) {
                return next;
            }
        }
    }

    /// Returns whether the current account changed.
    fn adopt(&mut self, next: Option<Account>) -> bool {
        if self.current == next {
            return false;
        }
        match &next {
            Some(account) => info!(%account, "account changed"),
            None => info!("account disconnected"),
        }
        self.current = next;
        true
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::{
        FakeWallet,
        account,
    };

    #[tokio::test]
    async fn probe_existing_session__returns_none_without_wallet() {
        // given
        let mut tracker = IdentityTracker::<FakeWallet>::new(None);

        // when
        let probed = tracker.probe_existing_session().await;

        // then
        assert_eq!(probed, None);
        assert_eq!(tracker.current(), None);
    }

    #[tokio::test]
    async fn request_connection__fails_with_wallet_unavailable_without_wallet() {
        let mut tracker = IdentityTracker::<FakeWallet>::new(None);
        let err = tracker.request_connection().await.unwrap_err();
        assert_eq!(err, GameError::WalletUnavailable);
    }

    #[tokio::test]
    async fn probe_existing_session__adopts_first_authorized_account() {
        // given
        let wallet = FakeWallet::with_accounts(vec![account(1)]);
        wallet.pre_authorize(account(1));
        let mut tracker = IdentityTracker::new(Some(wallet.clone()));

        // when
        let probed = tracker.probe_existing_session().await;

        // then
        assert_eq!(probed, Some(account(1)));
        assert_eq!(tracker.current(), Some(&account(1)));
        assert_eq!(wallet.request_count(), 0);
    }

    #[tokio::test]
    async fn request_connection__surfaces_user_rejection() {
        // given
        let wallet = FakeWallet::with_accounts(vec![account(1)]);
        wallet.reject_requests();
        let mut tracker = IdentityTracker::new(Some(wallet));

        // when
        let err = tracker.request_connection().await.unwrap_err();

        // then
        assert!(matches!(err, GameError::UserRejected(_)));
        assert_eq!(tracker.current(), None);
    }

    #[tokio::test]
    async fn next_change__skips_notifications_that_repeat_the_current_account() {
        // given
        let wallet = FakeWallet::with_accounts(vec![account(1), account(2)]);
        let mut tracker = IdentityTracker::new(Some(wallet.clone()));
        tracker.request_connection().await.unwrap();

        // when
        wallet.switch_to(Some(account(1)));
        wallet.switch_to(Some(account(2)));
        let changed = tracker.next_change().await;

        // then
        assert_eq!(changed, Some(account(2)));
        assert_eq!(tracker.current(), Some(&account(2)));
    }

    #[tokio::test]
    async fn next_change__reports_disconnect_as_none() {
        let wallet = FakeWallet::with_accounts(vec![account(1)]);
        let mut tracker = IdentityTracker::new(Some(wallet.clone()));
        tracker.request_connection().await.unwrap();

        wallet.switch_to(None);

        assert_eq!(tracker.next_change().await, None);
        assert_eq!(tracker.current(), None);
    }
}
