// Account collaborator: balance lookup and stake reservation.
//
// The ledger itself lives outside this client. `InMemoryWallet` backs the
// headless client and the tests.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::bet::Rejection;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("account service unavailable: {0}")]
    Unavailable(String),
}

impl From<AccountError> for Rejection {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InsufficientFunds { needed, available } => {
                Rejection::InsufficientFunds { needed, available }
            }
            AccountError::Unavailable(message) => Rejection::AccountUnavailable(message),
        }
    }
}

/// Balance and stake reservation, consulted only after the gate accepts.
#[async_trait]
pub trait AccountService: Send + Sync {
    async fn balance(&self) -> Result<u64, AccountError>;

    /// Reserve `amount` for a bet, debiting the available balance.
    async fn reserve_stake(&self, amount: u64) -> Result<(), AccountError>;
}

/// Process-local balance; nothing is persisted.
#[derive(Debug)]
pub struct InMemoryWallet {
    balance: Mutex<u64>,
}

impl InMemoryWallet {
    pub fn new(starting_balance: u64) -> Self {
        InMemoryWallet {
            balance: Mutex::new(starting_balance),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, u64>, AccountError> {
        self.balance
            .lock()
            .map_err(|_| AccountError::Unavailable("wallet lock poisoned".into()))
    }
}

#[async_trait]
impl AccountService for InMemoryWallet {
    async fn balance(&self) -> Result<u64, AccountError> {
        Ok(*self.lock()?)
    }

    async fn reserve_stake(&self, amount: u64) -> Result<(), AccountError> {
        let mut balance = self.lock()?;
        if *balance < amount {
            return Err(AccountError::InsufficientFunds {
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        info!("Reserved stake {}, balance now {}", amount, *balance);
        Ok(())
    }
}
