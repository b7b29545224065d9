mod common;

use common::{Call, MockGateway};
use hf_app::*;
use hf_core::{FRAME_RATE, ResultId, StepDomain};
use hf_results::FrameExport;

fn fetcher_for(gateway: &std::sync::Arc<MockGateway>, final_step: u64) -> ArtifactFetcher {
    let mut fetcher = ArtifactFetcher::new(gateway.clone());
    fetcher.register_domain(ResultId::from("r1"), StepDomain::new(final_step).unwrap());
    fetcher
}

#[tokio::test]
async fn out_of_range_steps_make_no_calls() {
    let gateway = MockGateway::new();
    let mut fetcher = fetcher_for(&gateway, 90);
    let id = ResultId::from("r1");

    for display in [-1, 2, 90] {
        let err = fetcher.fetch_step(&id, display).await.unwrap_err();
        assert!(matches!(err, AppError::OutOfRange(_)), "step {display}: {err}");
    }
    assert!(matches!(
        fetcher.fetch_range(&id, 0, 5).await,
        Err(AppError::OutOfRange(_))
    ));
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn unknown_result_is_rejected() {
    let gateway = MockGateway::new();
    let mut fetcher = ArtifactFetcher::new(gateway.clone());

    let err = fetcher
        .fetch_step(&ResultId::from("r9"), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn fetched_steps_are_cached_for_the_session() {
    let gateway = MockGateway::new();
    let mut fetcher = fetcher_for(&gateway, 90);
    let id = ResultId::from("r1");

    let set = fetcher.fetch_step(&id, 1).await.unwrap();
    assert_eq!(set.step, 45);
    assert_eq!(set.artifacts.len(), 2);
    assert_eq!(set.artifacts[1].category_name.as_deref(), Some("Pigpen 1"));

    let again = fetcher.fetch_step(&id, 1).await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&set, &again));
    assert_eq!(gateway.count(|c| matches!(c, Call::Images { .. })), 1);
    assert_eq!(gateway.count(|c| matches!(c, Call::Categories(_))), 1);

    fetcher.end_session();
    fetcher.fetch_step(&id, 1).await.unwrap();
    assert_eq!(gateway.count(|c| matches!(c, Call::Images { .. })), 2);
}

#[tokio::test]
async fn range_fetch_is_ordered_and_reused() {
    let gateway = MockGateway::new();
    let mut fetcher = fetcher_for(&gateway, 450);
    let id = ResultId::from("r1");

    let sets = fetcher.fetch_range(&id, 2, 6).await.unwrap();
    let steps: Vec<u64> = sets.iter().map(|s| s.display_step()).collect();
    assert_eq!(steps, vec![2, 3, 4, 5, 6]);
    assert!(gateway.calls().contains(&Call::Images {
        result_id: id.clone(),
        start: 90,
        end: 270,
    }));

    fetcher.fetch_range(&id, 3, 5).await.unwrap();
    fetcher.fetch_step(&id, 4).await.unwrap();
    assert_eq!(gateway.count(|c| matches!(c, Call::Images { .. })), 1);

    assert!(matches!(
        fetcher.fetch_range(&id, 5, 2).await,
        Err(AppError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn step_domain_loads_from_result_detail() {
    let gateway = MockGateway::new();
    gateway.set_final_step("r3", 225);
    let mut fetcher = ArtifactFetcher::new(gateway.clone());
    let id = ResultId::from("r3");

    let domain = fetcher.load_domain(&id).await.unwrap();
    assert_eq!(domain.last_display(), 4);
    fetcher.load_domain(&id).await.unwrap();
    assert_eq!(gateway.count(|c| matches!(c, Call::Detail(_))), 1);
}

#[tokio::test]
async fn fetched_range_exports_to_frame_folders() {
    let gateway = MockGateway::new();
    let mut fetcher = fetcher_for(&gateway, 135);
    let id = ResultId::from("r1");
    let sets = fetcher.fetch_range(&id, 0, 2).await.unwrap();

    let dir = std::env::temp_dir().join("hf_app_export_frames");
    let _ = std::fs::remove_dir_all(&dir);
    let export = FrameExport::new(dir.clone()).unwrap();
    let summary = export.write_sets(sets.iter().map(|s| s.as_ref())).unwrap();

    assert_eq!(summary.images_written, 6);
    assert!(dir.join("r1").join("simulator").join("000090.jpg").exists());
    assert!(dir.join("r1").join("pigpen_1").join("000000.jpg").exists());
}

#[tokio::test]
async fn server_steps_between_frames_are_ignored() {
    let gateway = MockGateway::new();
    gateway.answer_every_step();
    let mut fetcher = fetcher_for(&gateway, 945);
    let id = ResultId::from("r1");

    let sets = fetcher.fetch_range(&id, 0, 9).await.unwrap();
    assert_eq!(sets.len(), 10);
    assert!(sets.iter().all(|s| s.step % FRAME_RATE == 0));

    let wider = fetcher.fetch_range(&id, 0, 20).await.unwrap();
    assert_eq!(wider.len(), 21);
    assert_eq!(wider.last().map(|s| s.step), Some(900));
    assert_eq!(gateway.count(|c| matches!(c, Call::Images { .. })), 2);

    let inner = fetcher.fetch_range(&id, 5, 15).await.unwrap();
    assert_eq!(inner.len(), 11);
    assert_eq!(gateway.count(|c| matches!(c, Call::Images { .. })), 2);
}
