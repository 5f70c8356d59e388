//! パイプライン全体の結合テスト。
//!
//! インメモリのストアとスクリプト化したモデルで、アーカイブ投入から
//! 完了（または失敗・キャンセル）までを駆動する。

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use common::{Harness, ScriptedModel};
use cull_worker::pipeline::recovery;
use cull_worker::store::dao::CullDao;
use cull_worker::store::models::{Bucket, Job, JobStatus, MediaFile, MediaType};
use uuid::Uuid;

async fn seed_media_with_blob(
    harness: &Harness,
    job_id: Uuid,
    filename: &str,
    media_type: MediaType,
    content: &[u8],
    label: Option<&str>,
) -> MediaFile {
    use cull_worker::blob::BlobStore;

    let key = format!("jobs/{job_id}/original/{filename}");
    harness
        .blob
        .put(&key, bytes::Bytes::copy_from_slice(content), "image/jpeg")
        .await
        .expect("seed blob");

    let mime = match media_type {
        MediaType::Image => "image/jpeg",
        MediaType::Video => "video/mp4",
    };
    let file = MediaFile::new(
        job_id,
        filename,
        format!("shoot/{filename}"),
        key.clone(),
        format!("memory://{key}"),
        media_type,
        mime,
        content.len() as i64,
    );
    harness
        .dao
        .insert_media_file(&file)
        .await
        .expect("insert media");
    if let Some(label) = label {
        harness
            .dao
            .set_media_label(file.id, label)
            .await
            .expect("set label");
    }
    file
}

#[tokio::test]
async fn single_take_of_three_yields_one_bucket_and_three_picks() -> Result<()> {
    let harness = Harness::new();
    harness
        .model
        .declare_same_take_group("A", &[b"shot-a1", b"shot-a2", b"shot-a3"]);

    let job_id = harness
        .submit_archive(&[
            ("shoot/a1.jpg", b"shot-a1"),
            ("shoot/a2.jpg", b"shot-a2"),
            ("shoot/a3.jpg", b"shot-a3"),
        ])
        .await?;
    harness.run_to_end(job_id).await?;

    let job = harness.dao.get_job(job_id).await?.expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());

    let buckets = harness.dao.list_buckets(job_id).await?;
    assert_eq!(buckets.len(), 1);

    let matches = harness.dao.list_matches(buckets[0].id).await?;
    assert_eq!(matches.len(), 3);
    for record in &matches {
        assert!(record.winner_id == record.media1_id || record.winner_id == record.media2_id);
    }

    // 3枚のバケットでは min(3, 3) = 3 枚すべてがピック
    let files = harness.dao.list_media_files(job_id).await?;
    assert_eq!(files.iter().filter(|f| f.is_top_pick).count(), 3);

    // すべてのメディアがラベルとバケットを持つ
    assert!(files.iter().all(|f| f.label.is_some() && f.bucket_id.is_some()));
    Ok(())
}

#[tokio::test]
async fn two_takes_rank_only_the_pair() -> Result<()> {
    let harness = Harness::new();
    harness
        .model
        .declare_same_take_group("A", &[b"shot-a1", b"shot-a2"]);
    harness.model.declare_same_take_group("B", &[b"shot-b1"]);

    let job_id = harness
        .submit_archive(&[
            ("a1.jpg", b"shot-a1"),
            ("a2.jpg", b"shot-a2"),
            ("b1.jpg", b"shot-b1"),
        ])
        .await?;
    harness.run_to_end(job_id).await?;

    let buckets = harness.dao.list_buckets(job_id).await?;
    assert_eq!(buckets.len(), 2);

    let files = harness.dao.list_media_files(job_id).await?;
    let bucket_of = |name: &str| {
        files
            .iter()
            .find(|f| f.filename == name)
            .and_then(|f| f.bucket_id)
            .expect("assigned")
    };
    assert_eq!(bucket_of("a1.jpg"), bucket_of("a2.jpg"));
    assert_ne!(bucket_of("a1.jpg"), bucket_of("b1.jpg"));

    // ペアの1試合だけが行われ、単独バケットはピックされない
    let all_matches = harness.dao.list_matches_for_job(job_id).await?;
    assert_eq!(all_matches.len(), 1);

    let picks: Vec<&MediaFile> = files.iter().filter(|f| f.is_top_pick).collect();
    assert_eq!(picks.len(), 2);
    assert!(picks.iter().all(|f| f.filename != "b1.jpg"));
    Ok(())
}

#[tokio::test]
async fn merge_pass_reconciles_fragmented_buckets() -> Result<()> {
    let harness = Harness::new();
    harness
        .model
        .declare_same_take_group("A", &[b"frag-1", b"frag-2", b"frag-3"]);

    // Phase A のレースで3つに割れた状態から再開する
    let job = Job::new(None);
    harness.dao.insert_job(&job).await?;

    let contents: [&[u8]; 3] = [b"frag-1", b"frag-2", b"frag-3"];
    for (index, content) in contents.iter().enumerate() {
        let file = seed_media_with_blob(
            &harness,
            job.id,
            &format!("f{index}.jpg"),
            MediaType::Image,
            content,
            Some("fragmented take"),
        )
        .await;

        let bucket = Bucket::new(job.id, format!("Bucket {}", index + 1));
        harness.dao.insert_bucket(&bucket).await?;
        harness.dao.assign_bucket(&[file.id], bucket.id).await?;
    }
    harness
        .dao
        .advance_job_stage(job.id, JobStatus::Clustering)
        .await?;

    harness.run_to_end(job.id).await?;

    let buckets = harness.dao.list_buckets(job.id).await?;
    assert_eq!(buckets.len(), 1, "all three fragments merge into one bucket");

    let files = harness.dao.list_media_files(job.id).await?;
    let survivor = buckets[0].id;
    assert!(files.iter().all(|f| f.bucket_id == Some(survivor)));

    let job = harness.dao.get_job(job.id).await?.expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn mixed_media_ranks_separately_and_enhances_images_only() -> Result<()> {
    let harness = Harness::new();
    harness
        .model
        .declare_same_take_group("A", &[b"img-1", b"img-2"]);

    let job_id = harness
        .submit_archive(&[
            ("a1.jpg", b"img-1"),
            ("a2.jpg", b"img-2"),
            ("c1.mp4", b"vid-1"),
            ("c2.mp4", b"vid-2"),
        ])
        .await?;
    harness.run_to_end(job_id).await?;

    let buckets = harness.dao.list_buckets(job_id).await?;
    assert_eq!(buckets.len(), 2);
    let video_bucket = buckets
        .iter()
        .find(|b| b.name == "Videos")
        .expect("video bucket");

    let image_matches: Vec<_> = harness
        .dao
        .list_matches_for_job(job_id)
        .await?
        .into_iter()
        .filter(|m| m.media_type == MediaType::Image)
        .collect();
    assert_eq!(image_matches.len(), 1);

    let video_matches = harness.dao.list_matches(video_bucket.id).await?;
    assert_eq!(video_matches.len(), 1);
    assert_eq!(video_matches[0].media_type, MediaType::Video);

    // 補正は画像ピックにだけ走る
    let files = harness.dao.list_media_files(job_id).await?;
    let images: Vec<&MediaFile> = files
        .iter()
        .filter(|f| f.media_type == MediaType::Image)
        .collect();
    let videos: Vec<&MediaFile> = files
        .iter()
        .filter(|f| f.media_type == MediaType::Video)
        .collect();

    assert!(images.iter().all(|f| f.is_top_pick));
    assert!(images.iter().all(|f| f.enhanced_blob_key.is_some()));
    assert!(videos.iter().all(|f| f.is_top_pick));
    assert!(videos.iter().all(|f| f.enhanced_blob_key.is_none()));
    assert_eq!(harness.model.enhance_calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn cancellation_mid_ranking_keeps_partial_matches() -> Result<()> {
    // 4試合目以降の品質比較は完了しない
    let harness = Harness::with_model(ScriptedModel::new().with_hanging_compares_after(3));
    let contents: Vec<Vec<u8>> = (0..6).map(|i| format!("six-{i}").into_bytes()).collect();
    let refs: Vec<&[u8]> = contents.iter().map(Vec::as_slice).collect();
    harness.model.declare_same_take_group("A", &refs);

    let entries: Vec<(String, &[u8])> = contents
        .iter()
        .enumerate()
        .map(|(i, c)| (format!("s{i}.jpg"), c.as_slice()))
        .collect();
    let entry_refs: Vec<(&str, &[u8])> =
        entries.iter().map(|(n, c)| (n.as_str(), *c)).collect();

    let job_id = harness.submit_archive(&entry_refs).await?;

    let orchestrator = Arc::clone(&harness.orchestrator);
    let runner = tokio::spawn(async move { orchestrator.run_job(job_id).await });

    // 3試合が記録されるまで待つ
    for _ in 0..200 {
        let recorded = harness.dao.list_matches_for_job(job_id).await?.len();
        if recorded >= 3 {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(25)).await;
    }

    harness.orchestrator.cancel(job_id);
    runner.await.expect("runner joined")?;

    let job = harness.dao.get_job(job_id).await?.expect("job exists");
    assert_eq!(job.status, JobStatus::Ranking, "cancellation is not failure");
    assert!(job.error.is_none());

    let matches = harness.dao.list_matches_for_job(job_id).await?;
    assert_eq!(matches.len(), 3, "exactly the completed matches are recorded");

    // レーティングは記録済みの試合の分だけ動いている
    let files = harness.dao.list_media_files(job_id).await?;
    let moved = files
        .iter()
        .filter(|f| (f.rating_score - 1000.0).abs() > f64::EPSILON)
        .count();
    assert!(moved > 0 && moved <= 6);

    // ピックはまだ確定していない
    assert!(files.iter().all(|f| !f.is_top_pick));
    Ok(())
}

#[tokio::test]
async fn recovery_resumes_labeling_for_unlabeled_half() -> Result<()> {
    let harness = Harness::new();
    harness
        .model
        .declare_same_take_group("A", &[b"r-1", b"r-2", b"r-3", b"r-4"]);

    let job = Job::new(None);
    harness.dao.insert_job(&job).await?;

    let contents: [&[u8]; 4] = [b"r-1", b"r-2", b"r-3", b"r-4"];
    for (index, content) in contents.iter().enumerate() {
        let label = (index < 2).then_some("already labeled");
        seed_media_with_blob(
            &harness,
            job.id,
            &format!("r{index}.jpg"),
            MediaType::Image,
            content,
            label,
        )
        .await;
    }
    harness
        .dao
        .advance_job_stage(job.id, JobStatus::Labeling)
        .await?;

    let recovered = recovery::resume_unfinished_jobs(Arc::clone(&harness.orchestrator)).await?;
    assert_eq!(recovered, 1);

    harness
        .wait_until(job.id, |job| job.status == JobStatus::Completed)
        .await;

    // describe は未ラベルの半分にだけ呼ばれる
    assert_eq!(harness.model.describe_calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn recovery_fails_stranded_uploads() -> Result<()> {
    let harness = Harness::new();

    let job = Job::new(Some("interrupted".to_string()));
    harness.dao.insert_job(&job).await?;

    let recovered = recovery::resume_unfinished_jobs(Arc::clone(&harness.orchestrator)).await?;
    assert_eq!(recovered, 1);

    harness
        .wait_until(job.id, |job| job.status == JobStatus::Failed)
        .await;

    let job = harness.dao.get_job(job.id).await?.expect("job exists");
    assert!(
        job.error
            .as_deref()
            .is_some_and(|e| e.contains("upload interrupted"))
    );
    Ok(())
}

#[tokio::test]
async fn archive_without_media_fails_the_job() -> Result<()> {
    let harness = Harness::new();

    let job_id = harness
        .submit_archive(&[("notes/readme.txt", b"no photos here")])
        .await?;
    let result = harness.run_to_end(job_id).await;
    assert!(result.is_err());

    let job = harness.dao.get_job(job_id).await?.expect("job exists");
    assert_eq!(job.status, JobStatus::Failed);
    assert!(
        job.error
            .as_deref()
            .is_some_and(|e| e.contains("no media files"))
    );
    Ok(())
}

#[tokio::test]
async fn single_media_file_skips_ranking_and_enhancement() -> Result<()> {
    let harness = Harness::new();

    let job_id = harness.submit_archive(&[("only.jpg", b"lone-shot")]).await?;
    harness.run_to_end(job_id).await?;

    let job = harness.dao.get_job(job_id).await?.expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);

    let buckets = harness.dao.list_buckets(job_id).await?;
    assert_eq!(buckets.len(), 1);

    assert!(harness.dao.list_matches_for_job(job_id).await?.is_empty());

    let files = harness.dao.list_media_files(job_id).await?;
    assert_eq!(files.len(), 1);
    assert!(!files[0].is_top_pick, "a lone file is unique, not selected");
    assert!(files[0].enhanced_blob_key.is_none());
    assert_eq!(harness.model.enhance_calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn relabeling_run_skips_existing_labels() -> Result<()> {
    let harness = Harness::new();

    let job = Job::new(None);
    harness.dao.insert_job(&job).await?;
    seed_media_with_blob(
        &harness,
        job.id,
        "done.jpg",
        MediaType::Image,
        b"labeled-already",
        Some("existing label"),
    )
    .await;
    harness
        .dao
        .advance_job_stage(job.id, JobStatus::Labeling)
        .await?;

    harness.run_to_end(job.id).await?;

    let job = harness.dao.get_job(job.id).await?.expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        harness.model.describe_calls.load(Ordering::SeqCst),
        0,
        "labeled files never hit the model again"
    );

    let files = harness.dao.list_media_files(job.id).await?;
    assert_eq!(files[0].label.as_deref(), Some("existing label"));
    Ok(())
}

#[tokio::test]
async fn expansion_skips_noise_entries() -> Result<()> {
    let harness = Harness::new();
    harness.model.declare_same_take_group("A", &[b"keep-1"]);

    let job_id = harness
        .submit_archive(&[
            ("shoot/keep.jpg", b"keep-1"),
            ("shoot/._keep.jpg", b"resource fork"),
            ("__MACOSX/shoot/keep.jpg", b"metadata"),
            ("Thumbs.db", b"cache"),
            ("shoot/raw.cr2", b"unsupported"),
        ])
        .await?;
    harness.run_to_end(job_id).await?;

    let paths = harness.ingested_paths(job_id).await;
    assert_eq!(paths.len(), 1);
    assert!(paths.contains("shoot/keep.jpg"));
    Ok(())
}

#[tokio::test]
async fn progress_counters_never_exceed_total() -> Result<()> {
    let harness = Harness::new();
    harness
        .model
        .declare_same_take_group("A", &[b"p-1", b"p-2", b"p-3"]);

    let job_id = harness
        .submit_archive(&[
            ("p1.jpg", b"p-1"),
            ("p2.jpg", b"p-2"),
            ("p3.jpg", b"p-3"),
        ])
        .await?;

    let mut events = harness.orchestrator.progress().subscribe();
    harness.run_to_end(job_id).await?;

    while let Ok(event) = events.try_recv() {
        assert!(
            event.current <= event.total || event.total == 0,
            "progress {}/{} exceeded its stage total",
            event.current,
            event.total
        );
    }

    let job = harness.dao.get_job(job_id).await?.expect("job exists");
    assert!(job.processed_files <= job.total_files);
    Ok(())
}
