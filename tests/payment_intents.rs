//! Supporter and peer payments started through the orchestrator

mod common;

use common::world;
use partner_settlement::ledger::{TransactionKind, TransactionStatus};
use partner_settlement::money::Cents;
use partner_settlement::payment::{PaymentError, StartPayment};
use partner_settlement::rail::{IntentStatus, MockOutcome};
use partner_settlement::store::{Account, DirectoryStore, LedgerStore, PayeeProfile};
use partner_settlement::{AccountId, ProjectId};

fn project_payment(project: ProjectId, amount: i64) -> StartPayment {
    StartPayment {
        amount: Cents(amount),
        project_id: Some(project),
        ..Default::default()
    }
}

fn peer_payment(recipient: AccountId, amount: i64) -> StartPayment {
    StartPayment {
        amount: Cents(amount),
        recipient_account_id: Some(recipient),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_project_payment_payer_absorbs_fees() {
    let w = world(Cents(0)).await;
    let started = w
        .state
        .orchestrator
        .start_payment(w.supporter, project_payment(w.project, 10_000))
        .await
        .unwrap();

    // 100.00 + 2.9% + 0.30 processing + 2% platform
    assert_eq!(started.fees.total_charged, Cents(10_520));
    assert_eq!(started.fees.net_to_recipient, Cents(10_000));
    assert_eq!(started.receipt.status, TransactionStatus::Pending);
    assert_eq!(
        started.receipt.intent_status,
        Some(IntentStatus::RequiresConfirmation)
    );
    let intent_id = started.receipt.external_operation_id.clone().unwrap();
    assert_eq!(
        started.receipt.client_secret.as_deref(),
        Some(format!("{}_secret", intent_id).as_str())
    );

    let tx = w
        .state
        .orchestrator
        .ledger()
        .get(started.receipt.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.kind, TransactionKind::Payment);
    assert_eq!(tx.account_id, w.supporter);
    assert_eq!(tx.counterparty_id, Some(w.owner));
    assert_eq!(tx.refs.project_id, Some(w.project));
    assert_eq!(tx.amount, Cents(10_520));
    assert_eq!(tx.platform_fee, Cents(200));
    assert_eq!(tx.processing_fee, Cents(320));
    // nothing is credited until the payer confirms
    assert_eq!(w.balance(w.owner).await, Cents(0));
}

#[tokio::test]
async fn test_peer_payment_recipient_absorbs_fees() {
    let w = world(Cents(0)).await;
    let started = w
        .state
        .orchestrator
        .start_payment(w.supporter, peer_payment(w.partner, 10_000))
        .await
        .unwrap();

    assert_eq!(started.fees.total_charged, Cents(10_000));
    assert_eq!(started.fees.processing_fee, Cents::ZERO);
    assert_eq!(started.fees.platform_fee, Cents(200));
    assert_eq!(started.fees.net_to_recipient, Cents(9_800));

    let tx = w
        .state
        .orchestrator
        .ledger()
        .get(started.receipt.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.counterparty_id, Some(w.partner));
    assert_eq!(tx.refs.project_id, None);
}

#[tokio::test]
async fn test_confirm_after_payer_completes_intent() {
    let w = world(Cents(0)).await;
    let orchestrator = &w.state.orchestrator;
    let started = orchestrator
        .start_payment(w.supporter, peer_payment(w.partner, 10_000))
        .await
        .unwrap();
    let tx_id = started.receipt.transaction_id;

    // still awaiting the payer
    let receipt = orchestrator.confirm(tx_id).await.unwrap();
    assert_eq!(receipt.status, TransactionStatus::Pending);

    let intent_id = started.receipt.external_operation_id.unwrap();
    assert!(w.rail.set_intent_status(&intent_id, IntentStatus::Succeeded));

    let receipt = orchestrator.confirm(tx_id).await.unwrap();
    assert_eq!(receipt.status, TransactionStatus::Completed);
    assert_eq!(w.balance(w.partner).await, Cents(9_800));

    // a second confirm does not credit twice
    let again = orchestrator.confirm(tx_id).await.unwrap();
    assert_eq!(again.status, TransactionStatus::Completed);
    assert_eq!(w.balance(w.partner).await, Cents(9_800));
}

#[tokio::test]
async fn test_self_payment_rejected() {
    let w = world(Cents(0)).await;
    let err = w
        .state
        .orchestrator
        .start_payment(w.owner, project_payment(w.project, 10_000))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidRequest(_)));
    assert_eq!(w.rail.intent_calls(), 0);
}

#[tokio::test]
async fn test_exactly_one_target_required() {
    let w = world(Cents(0)).await;
    let both = StartPayment {
        amount: Cents(10_000),
        project_id: Some(w.project),
        recipient_account_id: Some(w.partner),
        method: None,
    };
    let err = w
        .state
        .orchestrator
        .start_payment(w.supporter, both)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidRequest(_)));

    let neither = StartPayment {
        amount: Cents(10_000),
        ..Default::default()
    };
    let err = w
        .state
        .orchestrator
        .start_payment(w.supporter, neither)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_non_positive_amount_rejected() {
    let w = world(Cents(0)).await;
    let err = w
        .state
        .orchestrator
        .start_payment(w.supporter, peer_payment(w.partner, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidAmount(_)));
    assert_eq!(w.rail.intent_calls(), 0);
}

#[tokio::test]
async fn test_payer_without_profile() {
    let w = world(Cents(0)).await;
    // the partner has a payee profile only
    let err = w
        .state
        .orchestrator
        .start_payment(w.partner, project_payment(w.project, 10_000))
        .await
        .unwrap_err();
    assert_eq!(err, PaymentError::NoPayerProfile(w.partner));
}

#[tokio::test]
async fn test_recipient_onboarding_incomplete() {
    let w = world(Cents(0)).await;
    let mut pending = Account::new("pending@example.com");
    pending.payee = Some(PayeeProfile {
        payee_id: "acct_pending".into(),
        onboarding_url: "https://connect.mock.test/onboarding/acct_pending".into(),
        onboarding_completed: false,
    });
    w.store.insert_account(&pending).await.unwrap();

    let err = w
        .state
        .orchestrator
        .start_payment(w.supporter, peer_payment(pending.id, 10_000))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PaymentError::RecipientOnboardingIncomplete {
            onboarding_url: "https://connect.mock.test/onboarding/acct_pending".into(),
        }
    );
    // nothing recorded before the checks pass
    let rows = w.store.transactions_for_account(w.supporter).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_rail_rejection_fails_row() {
    let w = world(Cents(0)).await;
    w.rail.set_outcome(MockOutcome::Reject {
        code: "card_declined".into(),
        retryable: false,
    });

    let err = w
        .state
        .orchestrator
        .start_payment(w.supporter, peer_payment(w.partner, 10_000))
        .await
        .unwrap_err();
    let PaymentError::ExternalRailRejected {
        transaction_id,
        code,
        retryable,
        ..
    } = err
    else {
        panic!("expected rail rejection, got {:?}", err);
    };
    assert_eq!(code, "card_declined");
    assert!(!retryable);

    let tx = w
        .state
        .orchestrator
        .ledger()
        .get(transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert!(tx.failure_reason.unwrap().starts_with("card_declined"));
}

#[tokio::test]
async fn test_lost_response_leaves_row_pending() {
    let w = world(Cents(0)).await;
    w.rail.set_outcome(MockOutcome::LoseResponse);

    let err = w
        .state
        .orchestrator
        .start_payment(w.supporter, peer_payment(w.partner, 10_000))
        .await
        .unwrap_err();
    let PaymentError::UnknownOutcome { transaction_id, .. } = err else {
        panic!("expected unknown outcome, got {:?}", err);
    };

    let tx = w
        .state
        .orchestrator
        .ledger()
        .get(transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.external_operation_id, None);
    assert_eq!(w.rail.intents_created(), 1);

    // the rail is searched by transaction id
    let receipt = w.state.orchestrator.confirm(transaction_id).await.unwrap();
    assert_eq!(receipt.status, TransactionStatus::Pending);
    assert_eq!(
        receipt.intent_status,
        Some(IntentStatus::RequiresConfirmation)
    );
    let tx = w
        .state
        .orchestrator
        .ledger()
        .get(transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert!(tx.external_operation_id.is_some());
}
