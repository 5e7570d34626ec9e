// Record lifecycle through the public library API, backed by the file
// stores the CLI uses.

use chrono::DateTime;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

use stagegate::gating::directory::{FactorSlot, Identity, Secret};
use stagegate::gating::totp;
use stagegate::sequence::FileSequenceStore;
use stagegate::workflow::types::{RecordStatus, Signer, StageContent, LAST_STAGE};
use stagegate::workflow::{TransitionOutcome, ViewContext};
use stagegate::{
    CoordinatorSettings, FileSystemGateway, GatingAuthority, InMemoryDirectory, NewInstance,
    RecordKind, SequenceAllocator, TotpParams, WorkflowCoordinator, WorkflowError, WorkflowPhase,
};

const SECRET: &[u8] = b"12345678901234567890";

fn coordinator(dir: &TempDir) -> WorkflowCoordinator {
    let directory = InMemoryDirectory::new(vec![Identity::new("Maria Lemos", "Chefe de Gabinete")
        .with_factor(FactorSlot::Secondary, Secret::new(SECRET.to_vec()))]);
    WorkflowCoordinator::new(
        CoordinatorSettings::default(),
        Arc::new(FileSystemGateway::new(dir.path())),
        SequenceAllocator::new(Arc::new(FileSequenceStore::new(
            dir.path().join("sequences.json"),
        ))),
        GatingAuthority::new(Arc::new(directory), TotpParams::default()),
    )
}

fn request(title: &str, digital_signature: bool) -> NewInstance {
    NewInstance {
        title: title.to_string(),
        kind: RecordKind::commission(),
        scope_id: "sector-7".to_string(),
        year: 2024,
        digital_signature,
    }
}

#[tokio::test]
async fn test_record_survives_restart_through_full_lifecycle() {
    let dir = TempDir::new().unwrap();
    let first = coordinator(&dir);

    let mut instance = first
        .create_instance(request("Office supplies", true))
        .await
        .unwrap();
    assert_eq!(instance.protocol, "COM-001/2024");

    let content = StageContent::with_body("Demand").signed_by(Signer::new(
        "MARIA  LEMOS",
        "Chefe de Gabinete",
        "sector-7",
    ));
    let mut challenge = match first.advance(&mut instance, content).await.unwrap() {
        TransitionOutcome::ChallengeIssued(challenge) => challenge,
        other => panic!("expected a challenge, got {other:?}"),
    };
    assert_eq!(challenge.eligible_factors(), vec![FactorSlot::Secondary]);

    let at = DateTime::from_timestamp(1_111_111_109, 0).unwrap();
    let code = totp::generate(SECRET, 1_111_111_109, &TotpParams::default());
    first
        .resolve_challenge_at(&mut instance, &mut challenge, &code, at)
        .await
        .unwrap();

    // a second process sees the committed state
    let second = coordinator(&dir);
    let mut reloaded = second.load(&instance.id).await.unwrap();
    assert_eq!(reloaded, instance);
    assert_eq!(
        reloaded.stage_history[0].verification.as_ref().unwrap().method,
        "totp:secondary"
    );

    for stage in 1..LAST_STAGE {
        second
            .advance(&mut reloaded, StageContent::with_body(&format!("Stage {stage}")))
            .await
            .unwrap();
    }
    second
        .finish(&mut reloaded, StageContent::with_body("Ratified"), true)
        .await
        .unwrap();
    assert_eq!(second.phase(&reloaded), WorkflowPhase::Completed);
    assert_eq!(reloaded.status, RecordStatus::Completed);

    second.reopen(&mut reloaded).await.unwrap();
    second
        .save(&mut reloaded, StageContent::with_body("Ratified, amended"))
        .await
        .unwrap();
    second.close_reopen(&mut reloaded).await.unwrap();

    let stored = coordinator(&dir).load(&instance.id).await.unwrap();
    assert_eq!(stored.stage_history.len(), LAST_STAGE + 1);
    assert_eq!(stored.stage_history[LAST_STAGE].body, "Ratified, amended");
    assert!(stored.stage_history[LAST_STAGE].revised_at.is_some());
    assert!(stored.active_draft.is_none());
}

#[tokio::test]
async fn test_concurrent_creation_allocates_distinct_protocols() {
    let dir = TempDir::new().unwrap();
    let coordinator = coordinator(&dir);

    let created = join_all((0..20).map(|i| {
        let coordinator = &coordinator;
        async move {
            coordinator
                .create_instance(request(&format!("Record {i}"), false))
                .await
        }
    }))
    .await;

    let protocols: HashSet<String> = created
        .into_iter()
        .map(|result| result.unwrap().protocol)
        .collect();
    assert_eq!(protocols.len(), 20);
    assert!(protocols.contains("COM-001/2024"));
    assert!(protocols.contains("COM-020/2024"));
    assert_eq!(coordinator.list().await.unwrap().len(), 20);
}

#[tokio::test]
async fn test_navigation_rules_hold_across_reload() {
    let dir = TempDir::new().unwrap();
    let coordinator = coordinator(&dir);
    let mut instance = coordinator
        .create_instance(request("Office supplies", false))
        .await
        .unwrap();

    for stage in 0..3 {
        coordinator
            .advance(&mut instance, StageContent::with_body(&format!("Stage {stage}")))
            .await
            .unwrap();
    }
    coordinator.submit_for_approval(&mut instance).await.unwrap();

    let mut reloaded = coordinator.load(&instance.id).await.unwrap();
    assert!(matches!(
        coordinator.view_stage(&mut reloaded, 2, ViewContext::OwnerTracking),
        Err(WorkflowError::GuardRejection(_))
    ));
    let view = coordinator
        .view_stage(&mut reloaded, 0, ViewContext::OwnerTracking)
        .unwrap();
    assert_eq!(view.content.body, "Stage 0");

    let view = coordinator
        .view_stage(&mut reloaded, 2, ViewContext::Editor)
        .unwrap();
    assert!(view.read_only);
    assert!(coordinator
        .view_stage(&mut reloaded, 4, ViewContext::Editor)
        .is_err());
}
