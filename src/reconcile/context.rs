use tokio::sync::watch;

use crate::identity::AuthState;

/// Read side of the controller, handed to whatever renders the authentication state.
///
/// Every clone observes the same published snapshots.
#[derive(Clone)]
pub struct AuthContext {
    rx: watch::Receiver<AuthState>,
}

impl AuthContext {
    pub(crate) fn new(rx: watch::Receiver<AuthState>) -> Self {
        Self { rx }
    }

    pub fn snapshot(&self) -> AuthState {
        self.rx.borrow().clone()
    }

    pub fn is_authorized(&self) -> bool {
        self.rx.borrow().is_authorized()
    }

    /// Next published state, or `None` once the controller is gone.
    pub async fn changed(&mut self) -> Option<AuthState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until no reconciliation is in progress.
    pub async fn settled(&mut self) -> Option<AuthState> {
        let st = self.rx.wait_for(|s| !s.is_loading).await.ok()?;
        Some(st.clone())
    }
}
