use std::sync::Arc;

use serde::{Deserialize, Serialize};
use slog::Logger;
use uuid::Uuid;

use super::Authorization;
use crate::config::PaymentsConfig;
use crate::db::ConsoleDb;
use crate::error::Result;
use crate::time::unix_now;

/// Billing account attached to a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAccount {
    pub user_id: Uuid,
    pub customer_id: String,
    /// Cents.
    pub coupon_value: i64,
    pub coupon_duration: u32,
    pub created_at: u64,
}

pub struct PaymentsService {
    logger: Logger,
    db: Arc<dyn ConsoleDb>,
    config: PaymentsConfig,
}

impl PaymentsService {
    pub fn new(logger: Logger, db: Arc<dyn ConsoleDb>, config: PaymentsConfig) -> Self {
        Self { logger, db, config }
    }

    /// Creates the caller's payment account with the sign-up coupon. Returns the
    /// existing account when one is already set up.
    pub fn setup_account(&self, auth: &Authorization) -> Result<PaymentAccount> {
        if let Some(existing) = self.db.get_payment_account(&auth.user.id)? {
            return Ok(existing);
        }
        let account = PaymentAccount {
            user_id: auth.user.id,
            customer_id: format!("cus_{}", Uuid::new_v4().simple()),
            coupon_value: self.config.coupon_value,
            coupon_duration: self.config.coupon_duration,
            created_at: unix_now(),
        };
        self.db.insert_payment_account(&account)?;
        slog::info!(self.logger, "Payment account created"; "user" => %auth.user.id);
        Ok(account)
    }

    pub fn account(&self, auth: &Authorization) -> Result<Option<PaymentAccount>> {
        self.db.get_payment_account(&auth.user.id)
    }
}
