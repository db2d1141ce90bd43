//! PostgreSQL store
//!
//! Runtime-checked queries (`sqlx::query` + `bind`). Compare-and-set updates
//! are `UPDATE ... WHERE status = 'pending'` and report success through
//! `rows_affected() > 0`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Postgres;

use super::*;
use crate::db::SafeRow;
use crate::ledger::types::{TransactionKind, TransactionRefs};
use crate::withdrawal::state::WithdrawalStatus;

/// Postgres [`Store`] implementation
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

const TX_COLUMNS: &str = "id, account_id, counterparty_id, kind, rail, amount, platform_fee, \
     processing_fee, net_amount, status, external_operation_id, project_id, \
     partner_invitation_id, withdrawal_id, failure_reason, created_at, updated_at";

const WITHDRAWAL_COLUMNS: &str = "id, partner_invitation_id, organization_id, amount, \
     financial_report_id, status, rejection_reason, external_operation_id, settlement_tx_id, \
     claim_token, claimed_at, requested_by, decided_by, created_at, updated_at";

const ACCOUNT_COLUMNS: &str = "id, email, balance, customer_id, payee_id, onboarding_url, \
     onboarding_completed, subscription_id, subscription_status, price_id, current_period_end, \
     subscription_event_at";

/// SQLSTATE check_violation, raised by `balance_non_negative`
const CHECK_VIOLATION: &str = "23514";

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn balance_error(e: sqlx::Error, account_id: AccountId) -> StoreError {
    if let sqlx::Error::Database(db) = &e
        && db.code().as_deref() == Some(CHECK_VIOLATION)
    {
        return StoreError::InsufficientBalance(account_id);
    }
    e.into()
}

// ============================================================================
// Row mapping
// ============================================================================

fn tx_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    Ok(Transaction {
        id: row.get_parsed("id")?,
        account_id: row.get_parsed("account_id")?,
        counterparty_id: row.get_parsed_opt("counterparty_id")?,
        kind: row.get_parsed::<TransactionKind>("kind")?,
        rail: row.get_parsed("rail")?,
        amount: Cents(row.get_logged("amount")?),
        platform_fee: Cents(row.get_logged("platform_fee")?),
        processing_fee: Cents(row.get_logged("processing_fee")?),
        net_amount: Cents(row.get_logged("net_amount")?),
        status: row.get_parsed("status")?,
        external_operation_id: row.get_logged("external_operation_id")?,
        refs: TransactionRefs {
            project_id: row.get_parsed_opt("project_id")?,
            partner_invitation_id: row.get_parsed_opt("partner_invitation_id")?,
            withdrawal_id: row.get_parsed_opt("withdrawal_id")?,
        },
        failure_reason: row.get_logged("failure_reason")?,
        created_at: row.get_logged("created_at")?,
        updated_at: row.get_logged("updated_at")?,
    })
}

fn withdrawal_from_row(row: &PgRow) -> Result<WithdrawalRequest, StoreError> {
    Ok(WithdrawalRequest {
        id: row.get_parsed("id")?,
        partner_invitation_id: row.get_parsed("partner_invitation_id")?,
        organization_id: row.get_parsed("organization_id")?,
        amount: Cents(row.get_logged("amount")?),
        financial_report_id: row.get_parsed_opt("financial_report_id")?,
        status: row.get_parsed::<WithdrawalStatus>("status")?,
        rejection_reason: row.get_logged("rejection_reason")?,
        external_operation_id: row.get_logged("external_operation_id")?,
        settlement_tx_id: row.get_parsed_opt("settlement_tx_id")?,
        claim_token: row.get_logged("claim_token")?,
        claimed_at: row.get_logged("claimed_at")?,
        requested_by: row.get_parsed("requested_by")?,
        decided_by: row.get_parsed_opt("decided_by")?,
        created_at: row.get_logged("created_at")?,
        updated_at: row.get_logged("updated_at")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let customer_id: Option<String> = row.get_logged("customer_id")?;
    let payee_id: Option<String> = row.get_logged("payee_id")?;
    let subscription_id: Option<String> = row.get_logged("subscription_id")?;

    let payee = match payee_id {
        Some(payee_id) => Some(PayeeProfile {
            payee_id,
            onboarding_url: row
                .get_logged::<Option<String>>("onboarding_url")?
                .unwrap_or_default(),
            onboarding_completed: row.get_logged("onboarding_completed")?,
        }),
        None => None,
    };
    let subscription = match subscription_id {
        Some(subscription_id) => Some(Subscription {
            subscription_id,
            status: row
                .get_logged::<Option<String>>("subscription_status")?
                .unwrap_or_default(),
            price_id: row.get_logged("price_id")?,
            current_period_end: row.get_logged("current_period_end")?,
        }),
        None => None,
    };

    Ok(Account {
        id: row.get_parsed("id")?,
        email: row.get_logged("email")?,
        balance: Cents(row.get_logged("balance")?),
        payer: customer_id.map(|customer_id| PayerProfile { customer_id }),
        payee,
        subscription,
        subscription_event_at: row.get_logged("subscription_event_at")?,
    })
}

fn report_from_row(row: &PgRow) -> Result<FinancialReport, StoreError> {
    Ok(FinancialReport {
        id: row.get_parsed("id")?,
        organization_id: row.get_parsed("organization_id")?,
        partner_invitation_id: row.get_parsed("partner_invitation_id")?,
        available_profit_share: Cents(row.get_logged("available_profit_share")?),
        created_at: row.get_logged("created_at")?,
    })
}

/// Settle a pending transaction and apply its credit inside `conn`'s
/// transaction. Returns whether the CAS won.
async fn finalize_in(
    conn: &mut sqlx::PgConnection,
    id: TransactionId,
    to: TransactionStatus,
    finalize: &Finalize,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"UPDATE transactions
           SET status = $2,
               external_operation_id = COALESCE($3, external_operation_id),
               failure_reason = COALESCE($4, failure_reason),
               updated_at = NOW()
           WHERE id = $1 AND status = 'pending'"#,
    )
    .bind(id.to_string())
    .bind(to.as_str())
    .bind(finalize.external_id.as_deref())
    .bind(finalize.failure_reason.as_deref())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    if let Some(credit) = &finalize.credit {
        sqlx::query("SELECT update_balance($1, $2)")
            .bind(credit.account_id.to_string())
            .bind(credit.delta.value())
            .execute(&mut *conn)
            .await
            .map_err(|e| balance_error(e, credit.account_id))?;
    }
    Ok(true)
}

// ============================================================================
// LedgerStore
// ============================================================================

#[async_trait]
impl LedgerStore for PgStore {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO transactions (id, account_id, counterparty_id, kind, rail, amount,
                   platform_fee, processing_fee, net_amount, status, external_operation_id,
                   project_id, partner_invitation_id, withdrawal_id, failure_reason,
                   created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"#,
        )
        .bind(tx.id.to_string())
        .bind(tx.account_id.to_string())
        .bind(tx.counterparty_id.map(|id| id.to_string()))
        .bind(tx.kind.as_str())
        .bind(tx.rail.as_str())
        .bind(tx.amount.value())
        .bind(tx.platform_fee.value())
        .bind(tx.processing_fee.value())
        .bind(tx.net_amount.value())
        .bind(tx.status.as_str())
        .bind(tx.external_operation_id.as_deref())
        .bind(tx.refs.project_id.map(|id| id.to_string()))
        .bind(tx.refs.partner_invitation_id.map(|id| id.to_string()))
        .bind(tx.refs.withdrawal_id.map(|id| id.to_string()))
        .bind(tx.failure_reason.as_deref())
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TX_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tx_from_row).transpose()
    }

    async fn find_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE external_operation_id = $1 LIMIT 1",
            TX_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tx_from_row).transpose()
    }

    async fn transactions_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE account_id = $1 OR counterparty_id = $1 \
             ORDER BY created_at",
            TX_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(tx_from_row).collect()
    }

    async fn attach_external_id(
        &self,
        id: TransactionId,
        external_id: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE transactions SET external_operation_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id.to_string())
        .bind(external_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn finalize_transaction(
        &self,
        id: TransactionId,
        to: TransactionStatus,
        finalize: &Finalize,
    ) -> Result<bool, StoreError> {
        let mut db_tx = self.pool.begin().await?;
        let won = finalize_in(&mut db_tx, id, to, finalize).await?;
        db_tx.commit().await?;
        Ok(won)
    }

    async fn update_balance(
        &self,
        account_id: AccountId,
        delta: Cents,
    ) -> Result<Cents, StoreError> {
        let balance: i64 = sqlx::query_scalar::<Postgres, i64>("SELECT update_balance($1, $2)")
            .bind(account_id.to_string())
            .bind(delta.value())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| balance_error(e, account_id))?;
        Ok(Cents(balance))
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE status = 'pending' AND updated_at < $1 \
             ORDER BY updated_at LIMIT $2",
            TX_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(older_than)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(tx_from_row).collect()
    }
}

// ============================================================================
// DirectoryStore
// ============================================================================

#[async_trait]
impl DirectoryStore for PgStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO accounts (id, email, balance, customer_id, payee_id, onboarding_url,
                   onboarding_completed)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(account.id.to_string())
        .bind(&account.email)
        .bind(account.balance.value())
        .bind(account.payer.as_ref().map(|p| p.customer_id.clone()))
        .bind(account.payee.as_ref().map(|p| p.payee_id.clone()))
        .bind(account.payee.as_ref().map(|p| p.onboarding_url.clone()))
        .bind(account.payee.as_ref().is_some_and(|p| p.onboarding_completed))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_account_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE customer_id = $1",
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn set_payer_profile_if_absent(
        &self,
        id: AccountId,
        profile: &PayerProfile,
    ) -> Result<PayerProfile, StoreError> {
        let stored: Option<String> = sqlx::query_scalar(
            r#"UPDATE accounts SET customer_id = COALESCE(customer_id, $2)
               WHERE id = $1
               RETURNING customer_id"#,
        )
        .bind(id.to_string())
        .bind(&profile.customer_id)
        .fetch_optional(&self.pool)
        .await?
        .flatten();
        stored
            .map(|customer_id| PayerProfile { customer_id })
            .ok_or_else(|| StoreError::Database(format!("account {} not found", id)))
    }

    async fn set_payee_profile_if_absent(
        &self,
        id: AccountId,
        profile: &PayeeProfile,
    ) -> Result<PayeeProfile, StoreError> {
        let row = sqlx::query(
            r#"UPDATE accounts
               SET payee_id = COALESCE(payee_id, $2),
                   onboarding_url = CASE WHEN payee_id IS NULL THEN $3 ELSE onboarding_url END,
                   onboarding_completed = CASE WHEN payee_id IS NULL THEN $4 ELSE onboarding_completed END
               WHERE id = $1
               RETURNING payee_id, onboarding_url, onboarding_completed"#,
        )
        .bind(id.to_string())
        .bind(&profile.payee_id)
        .bind(&profile.onboarding_url)
        .bind(profile.onboarding_completed)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::Database(format!("account {} not found", id)))?;

        Ok(PayeeProfile {
            payee_id: row.get_logged("payee_id")?,
            onboarding_url: row
                .get_logged::<Option<String>>("onboarding_url")?
                .unwrap_or_default(),
            onboarding_completed: row.get_logged("onboarding_completed")?,
        })
    }

    async fn set_payee_onboarding(
        &self,
        payee_id: &str,
        completed: bool,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE accounts SET onboarding_completed = $2 WHERE payee_id = $1")
                .bind(payee_id)
                .bind(completed)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn apply_subscription(
        &self,
        customer_id: &str,
        subscription: Option<&Subscription>,
        event_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE accounts
               SET subscription_id = $2,
                   subscription_status = $3,
                   price_id = $4,
                   current_period_end = $5,
                   subscription_event_at = $6
               WHERE customer_id = $1
                 AND (subscription_event_at IS NULL OR subscription_event_at <= $6)"#,
        )
        .bind(customer_id)
        .bind(subscription.map(|s| s.subscription_id.clone()))
        .bind(subscription.map(|s| s.status.clone()))
        .bind(subscription.and_then(|s| s.price_id.clone()))
        .bind(subscription.and_then(|s| s.current_period_end))
        .bind(event_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_organization(&self, org: &Organization) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO organizations (id, owner_id, name) VALUES ($1, $2, $3)")
            .bind(org.id.to_string())
            .bind(org.owner_id.to_string())
            .bind(&org.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Option<Organization>, StoreError> {
        let row = sqlx::query("SELECT id, owner_id, name FROM organizations WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<Organization, StoreError> {
            Ok(Organization {
                id: row.get_parsed("id")?,
                owner_id: row.get_parsed("owner_id")?,
                name: row.get_logged("name")?,
            })
        })
        .transpose()
    }

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO projects (id, organization_id, owner_id, name) VALUES ($1, $2, $3, $4)",
        )
        .bind(project.id.to_string())
        .bind(project.organization_id.to_string())
        .bind(project.owner_id.to_string())
        .bind(&project.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        let row =
            sqlx::query("SELECT id, organization_id, owner_id, name FROM projects WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(|row| -> Result<Project, StoreError> {
            Ok(Project {
                id: row.get_parsed("id")?,
                organization_id: row.get_parsed("organization_id")?,
                owner_id: row.get_parsed("owner_id")?,
                name: row.get_logged("name")?,
            })
        })
        .transpose()
    }

    async fn insert_invitation(&self, invitation: &PartnerInvitation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO partner_invitations (id, organization_id, partner_id, status) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(invitation.id.to_string())
        .bind(invitation.organization_id.to_string())
        .bind(invitation.partner_id.to_string())
        .bind(invitation.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_invitation(
        &self,
        id: InvitationId,
    ) -> Result<Option<PartnerInvitation>, StoreError> {
        let row = sqlx::query(
            "SELECT id, organization_id, partner_id, status FROM partner_invitations WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| -> Result<PartnerInvitation, StoreError> {
            Ok(PartnerInvitation {
                id: row.get_parsed("id")?,
                organization_id: row.get_parsed("organization_id")?,
                partner_id: row.get_parsed("partner_id")?,
                status: row.get_parsed::<InvitationStatus>("status")?,
            })
        })
        .transpose()
    }

    async fn insert_report(&self, report: &FinancialReport) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO financial_reports (id, organization_id, partner_invitation_id, \
             available_profit_share, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(report.id.to_string())
        .bind(report.organization_id.to_string())
        .bind(report.partner_invitation_id.to_string())
        .bind(report.available_profit_share.value())
        .bind(report.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_report(&self, id: ReportId) -> Result<Option<FinancialReport>, StoreError> {
        let row = sqlx::query(
            "SELECT id, organization_id, partner_invitation_id, available_profit_share, \
             created_at FROM financial_reports WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(report_from_row).transpose()
    }

    async fn latest_report(
        &self,
        invitation_id: InvitationId,
    ) -> Result<Option<FinancialReport>, StoreError> {
        let row = sqlx::query(
            "SELECT id, organization_id, partner_invitation_id, available_profit_share, \
             created_at FROM financial_reports WHERE partner_invitation_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(invitation_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(report_from_row).transpose()
    }
}

// ============================================================================
// WithdrawalStore
// ============================================================================

const USAGE_SQL: &str = r#"SELECT
       COALESCE(SUM(amount) FILTER (WHERE status IN ('pending', 'approved')), 0)::BIGINT AS outstanding,
       COALESCE(SUM(amount) FILTER (WHERE status = 'completed' AND created_at >= $2), 0)::BIGINT AS completed
   FROM withdrawal_requests
   WHERE partner_invitation_id = $1"#;

#[async_trait]
impl WithdrawalStore for PgStore {
    async fn insert_withdrawal_capped(
        &self,
        request: &WithdrawalRequest,
        cap: Cents,
        since: DateTime<Utc>,
    ) -> Result<CapOutcome, StoreError> {
        let mut db_tx = self.pool.begin().await?;

        // Serializes concurrent creates for the same invitation across processes
        sqlx::query("SELECT id FROM partner_invitations WHERE id = $1 FOR UPDATE")
            .bind(request.partner_invitation_id.to_string())
            .fetch_optional(&mut *db_tx)
            .await?;

        let usage = sqlx::query(USAGE_SQL)
            .bind(request.partner_invitation_id.to_string())
            .bind(since)
            .fetch_one(&mut *db_tx)
            .await?;
        let outstanding = Cents(usage.get_logged("outstanding")?);
        let completed = Cents(usage.get_logged("completed")?);
        let available = cap - outstanding - completed;

        if request.amount > available {
            db_tx.rollback().await?;
            return Ok(CapOutcome::Exceeded {
                available: available.max(Cents::ZERO),
            });
        }

        sqlx::query(
            r#"INSERT INTO withdrawal_requests (id, partner_invitation_id, organization_id, amount,
                   financial_report_id, status, requested_by, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(request.id.to_string())
        .bind(request.partner_invitation_id.to_string())
        .bind(request.organization_id.to_string())
        .bind(request.amount.value())
        .bind(request.financial_report_id.map(|id| id.to_string()))
        .bind(request.status.as_str())
        .bind(request.requested_by.to_string())
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        Ok(CapOutcome::Inserted)
    }

    async fn get_withdrawal(
        &self,
        id: WithdrawalId,
    ) -> Result<Option<WithdrawalRequest>, StoreError> {
        let sql = format!(
            "SELECT {} FROM withdrawal_requests WHERE id = $1",
            WITHDRAWAL_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(withdrawal_from_row).transpose()
    }

    async fn list_withdrawals(
        &self,
        invitation_id: InvitationId,
    ) -> Result<Vec<WithdrawalRequest>, StoreError> {
        let sql = format!(
            "SELECT {} FROM withdrawal_requests WHERE partner_invitation_id = $1 \
             ORDER BY created_at, id",
            WITHDRAWAL_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(invitation_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(withdrawal_from_row).collect()
    }

    async fn withdrawal_usage(
        &self,
        invitation_id: InvitationId,
        since: DateTime<Utc>,
    ) -> Result<(Cents, Cents), StoreError> {
        let row = sqlx::query(USAGE_SQL)
            .bind(invitation_id.to_string())
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok((
            Cents(row.get_logged("outstanding")?),
            Cents(row.get_logged("completed")?),
        ))
    }

    async fn transition_withdrawal(
        &self,
        id: WithdrawalId,
        decision: &Decision,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE withdrawal_requests
               SET status = $3,
                   decided_by = COALESCE($4, decided_by),
                   rejection_reason = COALESCE($5, rejection_reason),
                   updated_at = NOW()
               WHERE id = $1 AND status = $2"#,
        )
        .bind(id.to_string())
        .bind(decision.from.as_str())
        .bind(decision.to.as_str())
        .bind(decision.decided_by.map(|a| a.to_string()))
        .bind(decision.reason.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_withdrawal(
        &self,
        id: WithdrawalId,
        token: &str,
        expired_before: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE withdrawal_requests
               SET claim_token = $2, claimed_at = NOW(), updated_at = NOW()
               WHERE id = $1
                 AND status = 'approved'
                 AND (claim_token IS NULL OR claimed_at IS NULL OR claimed_at < $3)"#,
        )
        .bind(id.to_string())
        .bind(token)
        .bind(expired_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_claim(&self, id: WithdrawalId, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE withdrawal_requests SET claim_token = NULL, claimed_at = NULL \
             WHERE id = $1 AND claim_token = $2",
        )
        .bind(id.to_string())
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_settlement_tx(
        &self,
        id: WithdrawalId,
        token: &str,
        tx_id: TransactionId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE withdrawal_requests SET settlement_tx_id = $3, updated_at = NOW() \
             WHERE id = $1 AND claim_token = $2 AND status = 'approved'",
        )
        .bind(id.to_string())
        .bind(token)
        .bind(tx_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_settlement_tx(
        &self,
        id: WithdrawalId,
        expected: TransactionId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE withdrawal_requests SET settlement_tx_id = NULL, updated_at = NOW() \
             WHERE id = $1 AND settlement_tx_id = $2 AND status = 'approved'",
        )
        .bind(id.to_string())
        .bind(expected.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete_withdrawal(
        &self,
        id: WithdrawalId,
        tx_id: TransactionId,
        external_id: &str,
        credit: Option<BalanceCredit>,
    ) -> Result<bool, StoreError> {
        let completed: bool =
            sqlx::query_scalar::<Postgres, bool>("SELECT process_withdrawal($1, $2, $3, $4, $5)")
                .bind(id.to_string())
                .bind(tx_id.to_string())
                .bind(external_id)
                .bind(credit.map(|c| c.account_id.to_string()))
                .bind(credit.map(|c| c.delta.value()))
                .fetch_one(&self.pool)
                .await?;
        Ok(completed)
    }
}

// ============================================================================
// EventStore
// ============================================================================

#[async_trait]
impl EventStore for PgStore {
    async fn is_event_processed(&self, event_id: &str) -> Result<bool, StoreError> {
        let found: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM payment_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn record_event(&self, event_id: &str, event_type: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO payment_events (event_id, event_type) VALUES ($1, $2) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(event_type)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
