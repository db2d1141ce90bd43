pub mod accounts;
pub mod health;
#[cfg(feature = "mock-api")]
pub mod mock;
pub mod payments;
pub mod webhooks;
pub mod withdrawals;

pub use accounts::{create_payee_profile, create_payer_profile, get_rail_balance, request_payout};
pub use health::health_check;
pub use payments::create_payment_intent;
pub use webhooks::payment_rail_webhook;
pub use withdrawals::{
    create_withdrawal, get_partner_balance, get_withdrawal, list_invitation_withdrawals,
    withdrawal_action,
};
