mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{PARTNER_PAYEE, World, world, world_with_timeout};
use partner_settlement::ledger::{TransactionKind, TransactionStatus};
use partner_settlement::money::Cents;
use partner_settlement::rail::MockOutcome;
use partner_settlement::store::{DirectoryStore, LedgerStore, WithdrawalStore};
use partner_settlement::withdrawal::{CreateWithdrawal, WithdrawalRequest, WithdrawalStatus};
use partner_settlement::{Actor, SettlementError};

fn request(w: &World, amount: i64) -> CreateWithdrawal {
    CreateWithdrawal {
        partner_invitation_id: w.invitation,
        organization_id: w.organization,
        amount: Cents(amount),
        financial_report_id: None,
    }
}

async fn approved(w: &World, amount: i64) -> WithdrawalRequest {
    let created = w
        .state
        .withdrawals
        .create(Actor::Account(w.partner), request(w, amount))
        .await
        .unwrap();
    w.state
        .withdrawals
        .approve(created.id, Actor::Account(w.owner))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_request_approve_process_completes() {
    let w = world(Cents(80_000)).await;
    let created = w
        .state
        .withdrawals
        .create(Actor::Account(w.partner), request(&w, 50_000))
        .await
        .unwrap();
    assert_eq!(created.status, WithdrawalStatus::Pending);
    assert_eq!(created.financial_report_id, Some(w.report));

    let approved = w
        .state
        .withdrawals
        .approve(created.id, Actor::Account(w.owner))
        .await
        .unwrap();
    assert_eq!(approved.status, WithdrawalStatus::Approved);
    assert_eq!(approved.decided_by, Some(w.owner));

    let outcome = w
        .state
        .withdrawals
        .process(created.id, Actor::Account(w.owner))
        .await
        .unwrap();
    assert!(outcome.settled_now);
    assert_eq!(outcome.withdrawal.status, WithdrawalStatus::Completed);
    assert!(outcome.withdrawal.external_operation_id.is_some());
    assert!(outcome.withdrawal.claim_token.is_none());

    // recipient absorbs: charged 500.00, partner nets 500.00 - 2% platform fee
    let tx_id = outcome.transaction_id.unwrap();
    let tx = w.store.get_transaction(tx_id).await.unwrap().unwrap();
    assert_eq!(tx.kind, TransactionKind::Withdrawal);
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.amount, Cents(50_000));
    assert_eq!(tx.net_amount, Cents(49_000));
    assert_eq!(tx.refs.withdrawal_id, Some(created.id));
    assert_eq!(w.balance(w.partner).await, Cents(49_000));
    assert_eq!(w.rail.succeeded_charges(), 1);

    let balance = w
        .state
        .balances
        .available_to_withdraw(w.invitation, None)
        .await
        .unwrap();
    assert_eq!(balance.available, Cents(30_000));
    assert_eq!(balance.completed_since_report, Cents(50_000));
}

#[tokio::test]
async fn test_approve_twice_is_idempotent() {
    let w = world(Cents(80_000)).await;
    let created = w
        .state
        .withdrawals
        .create(Actor::Account(w.partner), request(&w, 10_000))
        .await
        .unwrap();

    let first = w
        .state
        .withdrawals
        .approve(created.id, Actor::Account(w.owner))
        .await
        .unwrap();
    let second = w
        .state
        .withdrawals
        .approve(created.id, Actor::Account(w.owner))
        .await
        .unwrap();

    assert_eq!(first.status, WithdrawalStatus::Approved);
    assert_eq!(second, first);
    assert!(w.store.transactions_for_account(w.owner).await.unwrap().is_empty());
    assert_eq!(w.rail.intent_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_process_charges_once() {
    let w = world(Cents(80_000)).await;
    let target = approved(&w, 20_000).await;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let state = Arc::clone(&w.state);
            let owner = w.owner;
            tokio::spawn(async move {
                state
                    .withdrawals
                    .process(target.id, Actor::Account(owner))
                    .await
            })
        })
        .collect();

    let mut settled_now = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.withdrawal.status, WithdrawalStatus::Completed);
        if outcome.settled_now {
            settled_now += 1;
        }
    }

    assert_eq!(settled_now, 1);
    assert_eq!(w.rail.intent_calls(), 1);
    assert_eq!(w.rail.succeeded_charges(), 1);
    assert_eq!(w.balance(w.partner).await, Cents(19_600));
}

#[tokio::test]
async fn test_create_over_available_writes_nothing() {
    let w = world(Cents(80_000)).await;
    let err = w
        .state
        .withdrawals
        .create(Actor::Account(w.partner), request(&w, 100_000))
        .await
        .unwrap_err();

    assert!(matches!(err, SettlementError::PreconditionFailed { .. }));
    assert_eq!(err.http_status(), 422);
    assert!(err.to_string().contains("800.00 available"));
    assert!(w.store.list_withdrawals(w.invitation).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_outstanding_requests_count_against_cap() {
    let w = world(Cents(80_000)).await;
    let partner = Actor::Account(w.partner);
    w.state
        .withdrawals
        .create(partner, request(&w, 50_000))
        .await
        .unwrap();

    let err = w
        .state
        .withdrawals
        .create(partner, request(&w, 40_000))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("300.00 available"));

    w.state
        .withdrawals
        .create(partner, request(&w, 30_000))
        .await
        .unwrap();
    assert_eq!(w.store.list_withdrawals(w.invitation).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_cannot_overdraw() {
    let w = Arc::new(world(Cents(100_000)).await);
    let attempts = (0..5).map(|_| {
        let w = Arc::clone(&w);
        tokio::spawn(async move {
            w.state
                .withdrawals
                .create(Actor::Account(w.partner), request(&w, 30_000))
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;

    let accepted = results
        .into_iter()
        .map(|joined| joined.unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(accepted, 3);
    let stored = w.store.list_withdrawals(w.invitation).await.unwrap();
    let total: i64 = stored.iter().map(|r| r.amount.value()).sum();
    assert_eq!(total, 90_000);
}

#[tokio::test]
async fn test_rejected_request_frees_the_cap() {
    let w = world(Cents(80_000)).await;
    let created = w
        .state
        .withdrawals
        .create(Actor::Account(w.partner), request(&w, 80_000))
        .await
        .unwrap();

    let rejected = w
        .state
        .withdrawals
        .reject(created.id, Actor::Account(w.owner), Some("numbers off".into()))
        .await
        .unwrap();
    assert_eq!(rejected.status, WithdrawalStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("numbers off"));

    let err = w
        .state
        .withdrawals
        .approve(created.id, Actor::Account(w.owner))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::InvalidStateTransition(_)));

    w.state
        .withdrawals
        .create(Actor::Account(w.partner), request(&w, 80_000))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_lost_response_then_retry_charges_once() {
    let w = world(Cents(80_000)).await;
    let target = approved(&w, 30_000).await;

    w.rail.set_outcome(MockOutcome::LoseResponse);
    let err = w
        .state
        .withdrawals
        .process(target.id, Actor::Account(w.owner))
        .await
        .unwrap_err();
    let SettlementError::UnknownOutcome { transaction_id, .. } = err else {
        panic!("expected unknown outcome, got {:?}", err);
    };

    let after = w.store.get_withdrawal(target.id).await.unwrap().unwrap();
    assert_eq!(after.status, WithdrawalStatus::Approved);
    assert_eq!(after.settlement_tx_id, Some(transaction_id));
    assert!(after.claim_token.is_none());

    w.rail.set_outcome(MockOutcome::Succeed);
    let outcome = w
        .state
        .withdrawals
        .process(target.id, Actor::System)
        .await
        .unwrap();

    assert_eq!(outcome.withdrawal.status, WithdrawalStatus::Completed);
    assert_eq!(outcome.transaction_id, Some(transaction_id));
    assert_eq!(w.rail.intents_created(), 1);
    assert_eq!(w.rail.succeeded_charges(), 1);
    assert_eq!(w.balance(w.partner).await, Cents(29_400));
}

#[tokio::test]
async fn test_rail_timeout_then_retry_charges_once() {
    let w = world_with_timeout(Cents(80_000), Duration::from_millis(50)).await;
    let target = approved(&w, 10_000).await;

    w.rail.set_delay(Some(Duration::from_millis(500)));
    let err = w
        .state
        .withdrawals
        .process(target.id, Actor::Account(w.owner))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::UnknownOutcome { .. }));
    assert_eq!(err.http_status(), 504);
    assert!(err.is_retryable());
    assert_eq!(
        w.store.get_withdrawal(target.id).await.unwrap().unwrap().status,
        WithdrawalStatus::Approved
    );

    w.rail.set_delay(None);
    let outcome = w
        .state
        .withdrawals
        .process(target.id, Actor::Account(w.owner))
        .await
        .unwrap();
    assert!(outcome.settled_now);
    assert_eq!(w.rail.succeeded_charges(), 1);
}

#[tokio::test]
async fn test_rail_rejection_leaves_request_approved() {
    let w = world(Cents(80_000)).await;
    let target = approved(&w, 10_000).await;

    w.rail.set_outcome(MockOutcome::Reject {
        code: "card_declined".into(),
        retryable: false,
    });
    let err = w
        .state
        .withdrawals
        .process(target.id, Actor::Account(w.owner))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::ExternalRail { ref code, .. } if code == "card_declined"));

    let after = w.store.get_withdrawal(target.id).await.unwrap().unwrap();
    assert_eq!(after.status, WithdrawalStatus::Approved);
    assert_eq!(after.settlement_tx_id, None);
    let failed = w.store.transactions_for_account(w.owner).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, TransactionStatus::Failed);

    w.rail.set_outcome(MockOutcome::Succeed);
    let outcome = w
        .state
        .withdrawals
        .process(target.id, Actor::Account(w.owner))
        .await
        .unwrap();
    assert!(outcome.settled_now);
    assert_ne!(outcome.transaction_id, Some(failed[0].id));
    assert_eq!(w.balance(w.partner).await, Cents(9_800));
}

#[tokio::test]
async fn test_only_owner_decides() {
    let w = world(Cents(80_000)).await;
    let created = w
        .state
        .withdrawals
        .create(Actor::Account(w.partner), request(&w, 10_000))
        .await
        .unwrap();

    for actor in [Actor::Account(w.partner), Actor::Account(w.supporter), Actor::System] {
        let err = w
            .state
            .withdrawals
            .approve(created.id, actor)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 403, "{} must not approve", actor);
    }

    let err = w
        .state
        .withdrawals
        .create(Actor::Account(w.owner), request(&w, 10_000))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::Authorization(_)));
}

#[tokio::test]
async fn test_process_requires_approval() {
    let w = world(Cents(80_000)).await;
    let created = w
        .state
        .withdrawals
        .create(Actor::Account(w.partner), request(&w, 10_000))
        .await
        .unwrap();

    let err = w
        .state
        .withdrawals
        .process(created.id, Actor::Account(w.owner))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::InvalidStateTransition(_)));
    assert_eq!(w.rail.intent_calls(), 0);
}

#[tokio::test]
async fn test_incomplete_onboarding_blocks_request() {
    let w = world(Cents(80_000)).await;
    w.store.set_payee_onboarding(PARTNER_PAYEE, false).await.unwrap();

    let err = w
        .state
        .withdrawals
        .create(Actor::Account(w.partner), request(&w, 10_000))
        .await
        .unwrap_err();
    match err {
        SettlementError::PreconditionFailed { onboarding_url, .. } => {
            assert!(onboarding_url.unwrap().contains(PARTNER_PAYEE));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_pending_intent_waits_for_webhook() {
    let w = world(Cents(80_000)).await;
    let target = approved(&w, 10_000).await;

    w.rail.set_outcome(MockOutcome::Processing);
    let outcome = w
        .state
        .withdrawals
        .process(target.id, Actor::Account(w.owner))
        .await
        .unwrap();
    assert!(!outcome.settled_now);
    assert_eq!(outcome.withdrawal.status, WithdrawalStatus::Approved);
    assert_eq!(w.balance(w.partner).await, Cents::ZERO);

    let tx = w
        .store
        .get_transaction(outcome.transaction_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert!(tx.external_operation_id.is_some());
}
