//! Asynchronous OCR job queue
//!
//! Uploads enqueue image ids here and return immediately; a background
//! dispatch loop feeds them to the executor, one at a time by default.
//! Job rows in SQLite carry the authoritative state (queued -> working ->
//! done | error), so a restart can re-enqueue whatever was still queued.
//!
//! A failed job marks its row `error` and the loop moves on. Nothing is
//! retried automatically; retrying means enqueueing the image again.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::db::{ImageRepository, JobRepository, JobStatus};
use crate::ocr::SpineOcr;
use crate::storage::StorageBackend;

/// Handle for enqueueing OCR work. Cheap to clone; all clones feed the
/// same dispatch loop.
#[derive(Clone)]
pub struct OcrQueue {
    tx: mpsc::UnboundedSender<String>,
    executor: Arc<JobExecutor>,
}

impl OcrQueue {
    /// Create the queue and spawn its dispatch loop.
    ///
    /// `concurrency` bounds how many images are processed at once; the
    /// default deployment passes 1, which keeps processing strictly serial
    /// in enqueue order.
    pub fn new(
        pool: SqlitePool,
        storage: Arc<dyn StorageBackend>,
        ocr: Arc<dyn SpineOcr>,
        ocr_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        let executor = Arc::new(JobExecutor {
            pool,
            storage,
            ocr,
            ocr_timeout,
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let loop_executor = executor.clone();

        tokio::spawn(async move {
            // Permit acquired before spawning keeps dispatch in FIFO order
            // and bounds in-flight work.
            while let Some(image_id) = rx.recv().await {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let executor = loop_executor.clone();
                tokio::spawn(async move {
                    if let Err(e) = executor.process(&image_id).await {
                        error!("OCR job for image {} failed to record status: {}", image_id, e);
                    }
                    drop(permit);
                });
            }
        });

        Self { tx, executor }
    }

    /// Re-enqueue every job still queued in the database. Called once at
    /// startup so work submitted before a restart is not lost.
    pub async fn start(&self) -> crate::error::Result<()> {
        let jobs = JobRepository::new(&self.executor.pool);
        let image_ids = jobs.queued_image_ids().await?;

        if !image_ids.is_empty() {
            info!("Resuming {} queued OCR job(s)", image_ids.len());
        }
        for image_id in image_ids {
            self.enqueue(&image_id);
        }
        Ok(())
    }

    /// Hand an image to the queue. Never blocks; the channel is unbounded.
    pub fn enqueue(&self, image_id: &str) {
        if self.tx.send(image_id.to_string()).is_err() {
            error!("OCR queue is closed; dropping image {}", image_id);
        }
    }
}

/// Runs one image through fetch -> OCR -> persist.
pub(crate) struct JobExecutor {
    pool: SqlitePool,
    storage: Arc<dyn StorageBackend>,
    ocr: Arc<dyn SpineOcr>,
    ocr_timeout: Duration,
}

impl JobExecutor {
    /// Process the latest job for an image.
    ///
    /// The job row is re-resolved here rather than passed in: if the image
    /// was enqueued again while waiting, the newest row is the one that
    /// counts, and stale queue entries collapse onto it.
    pub(crate) async fn process(&self, image_id: &str) -> crate::error::Result<()> {
        let jobs = JobRepository::new(&self.pool);

        let job = match jobs.latest_for_image(image_id).await? {
            Some(job) => job,
            None => return Ok(()),
        };

        jobs.set_status(&job.id, JobStatus::Working, None).await?;

        match self.run(image_id, &job.id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let message = e.to_string();
                warn!("OCR job {} for image {} failed: {}", job.id, image_id, message);
                jobs.set_status(&job.id, JobStatus::Error, Some(&message))
                    .await?;
                Ok(())
            }
        }
    }

    async fn run(&self, image_id: &str, job_id: &str) -> anyhow::Result<()> {
        let images = ImageRepository::new(&self.pool);

        let image = images
            .get(image_id)
            .await?
            .ok_or_else(|| anyhow!("Image not found"))?;

        let data = self
            .storage
            .fetch(&image.storage_path)
            .await
            .context("Failed to fetch image from storage")?;

        let result = tokio::time::timeout(self.ocr_timeout, self.ocr.extract(&data))
            .await
            .map_err(|_| crate::ocr::OcrError::Timeout(self.ocr_timeout.as_secs()))?;
        let spine = result?;

        let title = spine.title.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let author = spine.author.as_deref().map(str::trim).filter(|s| !s.is_empty());

        // OCR result and job completion land atomically. Title/author from
        // OCR win when present, otherwise existing values survive; a
        // checked-out image keeps its terminal status.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE images
            SET ocr_text = ?,
                title = COALESCE(?, title),
                author = COALESCE(?, author),
                status = CASE WHEN status = 'checked_out' THEN status ELSE 'ocr_done' END
            WHERE id = ?
            "#,
        )
        .bind(&spine.text)
        .bind(title)
        .bind(author)
        .bind(image_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE ocr_jobs SET status = 'done', error = NULL WHERE id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            "OCR done for image {} via {} backend",
            image_id,
            self.ocr.name()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, ImageStatus, NewImage};
    use crate::ocr::{MockOcr, OcrError, SpineText};
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::init_schema(&pool).await.unwrap();
        pool
    }

    fn mock_ocr(text: &str, title: Option<&str>, author: Option<&str>) -> Arc<dyn SpineOcr> {
        Arc::new(MockOcr {
            response: SpineText {
                text: text.to_string(),
                title: title.map(str::to_string),
                author: author.map(str::to_string),
            },
            fail_with: None,
        })
    }

    fn executor(pool: &SqlitePool, storage: Arc<MemoryStorage>, ocr: Arc<dyn SpineOcr>) -> JobExecutor {
        JobExecutor {
            pool: pool.clone(),
            storage,
            ocr,
            ocr_timeout: Duration::from_secs(5),
        }
    }

    async fn insert_image(pool: &SqlitePool, storage: &MemoryStorage, key: &str) -> String {
        storage.put(key, vec![1, 2, 3]);
        let image = ImageRepository::new(pool)
            .create(&NewImage {
                batch_id: "batch-1".to_string(),
                storage_path: key.to_string(),
                thumb_path: None,
            })
            .await
            .unwrap();
        image.id
    }

    #[tokio::test]
    async fn test_process_persists_ocr_and_completes_job() {
        let pool = setup_pool().await;
        let storage = Arc::new(MemoryStorage::new());
        let image_id = insert_image(&pool, &storage, "originals/a.jpg").await;
        let job = JobRepository::new(&pool).create(&image_id).await.unwrap();

        let exec = executor(
            &pool,
            storage,
            mock_ocr("MOBY DICK\nHERMAN MELVILLE", Some("Moby Dick"), Some("Herman Melville")),
        );
        exec.process(&image_id).await.unwrap();

        let image = ImageRepository::new(&pool).get(&image_id).await.unwrap().unwrap();
        assert_eq!(image.status, ImageStatus::OcrDone);
        assert_eq!(image.ocr_text.as_deref(), Some("MOBY DICK\nHERMAN MELVILLE"));
        assert_eq!(image.title.as_deref(), Some("Moby Dick"));
        assert_eq!(image.author.as_deref(), Some("Herman Melville"));

        let job = JobRepository::new(&pool).get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_process_keeps_existing_fields_when_ocr_has_none() {
        let pool = setup_pool().await;
        let storage = Arc::new(MemoryStorage::new());
        let image_id = insert_image(&pool, &storage, "originals/b.jpg").await;
        ImageRepository::new(&pool)
            .update_details(&image_id, Some("Hand Entered"), None)
            .await
            .unwrap();
        JobRepository::new(&pool).create(&image_id).await.unwrap();

        let exec = executor(&pool, storage, mock_ocr("unreadable spine", None, Some("A. Writer")));
        exec.process(&image_id).await.unwrap();

        let image = ImageRepository::new(&pool).get(&image_id).await.unwrap().unwrap();
        assert_eq!(image.title.as_deref(), Some("Hand Entered"));
        assert_eq!(image.author.as_deref(), Some("A. Writer"));
    }

    #[tokio::test]
    async fn test_process_filters_blank_title_and_author() {
        let pool = setup_pool().await;
        let storage = Arc::new(MemoryStorage::new());
        let image_id = insert_image(&pool, &storage, "originals/c.jpg").await;
        JobRepository::new(&pool).create(&image_id).await.unwrap();

        let exec = executor(&pool, storage, mock_ocr("text", Some(""), Some("   ")));
        exec.process(&image_id).await.unwrap();

        let image = ImageRepository::new(&pool).get(&image_id).await.unwrap().unwrap();
        assert!(image.title.is_none());
        assert!(image.author.is_none());
        assert_eq!(image.status, ImageStatus::OcrDone);
    }

    #[tokio::test]
    async fn test_process_never_regresses_checked_out_image() {
        let pool = setup_pool().await;
        let storage = Arc::new(MemoryStorage::new());
        let image_id = insert_image(&pool, &storage, "originals/d.jpg").await;
        ImageRepository::new(&pool)
            .mark_checked_out(&image_id, "Final Title", "Final Author")
            .await
            .unwrap();
        let job = JobRepository::new(&pool).create(&image_id).await.unwrap();

        let exec = executor(&pool, storage, mock_ocr("late ocr", None, None));
        exec.process(&image_id).await.unwrap();

        let image = ImageRepository::new(&pool).get(&image_id).await.unwrap().unwrap();
        assert_eq!(image.status, ImageStatus::CheckedOut);
        assert_eq!(image.ocr_text.as_deref(), Some("late ocr"));

        let job = JobRepository::new(&pool).get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_process_missing_image_marks_job_error() {
        let pool = setup_pool().await;
        let storage = Arc::new(MemoryStorage::new());
        let job = JobRepository::new(&pool).create("ghost-image").await.unwrap();

        let exec = executor(&pool, storage, mock_ocr("x", None, None));
        exec.process("ghost-image").await.unwrap();

        let job = JobRepository::new(&pool).get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("Image not found"));
    }

    #[tokio::test]
    async fn test_process_storage_failure_marks_job_error() {
        let pool = setup_pool().await;
        let storage = Arc::new(MemoryStorage::new());
        // Image row exists but the object was never stored.
        let image = ImageRepository::new(&pool)
            .create(&NewImage {
                batch_id: "batch-1".to_string(),
                storage_path: "originals/missing.jpg".to_string(),
                thumb_path: None,
            })
            .await
            .unwrap();
        let job = JobRepository::new(&pool).create(&image.id).await.unwrap();

        let exec = executor(&pool, storage, mock_ocr("x", None, None));
        exec.process(&image.id).await.unwrap();

        let job = JobRepository::new(&pool).get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.as_deref().unwrap().contains("storage"));

        let image = ImageRepository::new(&pool).get(&image.id).await.unwrap().unwrap();
        assert_eq!(image.status, ImageStatus::Pending);
    }

    #[tokio::test]
    async fn test_process_ocr_failure_leaves_image_untouched() {
        let pool = setup_pool().await;
        let storage = Arc::new(MemoryStorage::new());
        let image_id = insert_image(&pool, &storage, "originals/e.jpg").await;
        let job = JobRepository::new(&pool).create(&image_id).await.unwrap();

        let exec = executor(
            &pool,
            storage,
            Arc::new(MockOcr {
                response: SpineText {
                    text: String::new(),
                    title: None,
                    author: None,
                },
                fail_with: Some("backend unreachable".to_string()),
            }),
        );
        exec.process(&image_id).await.unwrap();

        let job = JobRepository::new(&pool).get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.as_deref().unwrap().contains("backend unreachable"));

        let image = ImageRepository::new(&pool).get(&image_id).await.unwrap().unwrap();
        assert_eq!(image.status, ImageStatus::Pending);
        assert!(image.ocr_text.is_none());
    }

    #[tokio::test]
    async fn test_process_without_job_is_a_noop() {
        let pool = setup_pool().await;
        let storage = Arc::new(MemoryStorage::new());
        let image_id = insert_image(&pool, &storage, "originals/f.jpg").await;

        let exec = executor(&pool, storage, mock_ocr("x", None, None));
        exec.process(&image_id).await.unwrap();

        let image = ImageRepository::new(&pool).get(&image_id).await.unwrap().unwrap();
        assert_eq!(image.status, ImageStatus::Pending);
    }

    #[tokio::test]
    async fn test_process_operates_on_latest_job() {
        let pool = setup_pool().await;
        let storage = Arc::new(MemoryStorage::new());
        let image_id = insert_image(&pool, &storage, "originals/g.jpg").await;
        let jobs = JobRepository::new(&pool);
        let older = jobs.create(&image_id).await.unwrap();
        let newer = jobs.create(&image_id).await.unwrap();

        let exec = executor(&pool, storage, mock_ocr("x", None, None));
        exec.process(&image_id).await.unwrap();

        assert_eq!(jobs.get(&newer.id).await.unwrap().unwrap().status, JobStatus::Done);
        assert_eq!(jobs.get(&older.id).await.unwrap().unwrap().status, JobStatus::Queued);
    }

    struct SlowOcr;

    #[async_trait]
    impl SpineOcr for SlowOcr {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn extract(&self, _image_data: &[u8]) -> Result<SpineText, OcrError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(SpineText {
                text: String::new(),
                title: None,
                author: None,
            })
        }
    }

    #[tokio::test]
    async fn test_process_times_out_hung_backend() {
        let pool = setup_pool().await;
        let storage = Arc::new(MemoryStorage::new());
        let image_id = insert_image(&pool, &storage, "originals/h.jpg").await;
        let job = JobRepository::new(&pool).create(&image_id).await.unwrap();

        let exec = JobExecutor {
            pool: pool.clone(),
            storage,
            ocr: Arc::new(SlowOcr),
            ocr_timeout: Duration::from_millis(50),
        };
        exec.process(&image_id).await.unwrap();

        let job = JobRepository::new(&pool).get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.as_deref().unwrap().contains("timed out"));
    }

    async fn wait_for_job_status(pool: &SqlitePool, job_id: &str, want: JobStatus) -> bool {
        let jobs = JobRepository::new(pool);
        for _ in 0..100 {
            if let Some(job) = jobs.get(job_id).await.unwrap() {
                if job.status == want {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_queue_start_resumes_only_queued_jobs() {
        let pool = setup_pool().await;
        let storage = Arc::new(MemoryStorage::new());
        let queued_img = insert_image(&pool, &storage, "originals/i.jpg").await;
        let working_img = insert_image(&pool, &storage, "originals/j.jpg").await;
        let done_img = insert_image(&pool, &storage, "originals/m.jpg").await;
        let jobs = JobRepository::new(&pool);

        let queued_job = jobs.create(&queued_img).await.unwrap();
        let working_job = jobs.create(&working_img).await.unwrap();
        jobs.set_status(&working_job.id, JobStatus::Working, None)
            .await
            .unwrap();
        // A queued row superseded by a newer done row for the same image.
        let superseded_job = jobs.create(&done_img).await.unwrap();
        let done_job = jobs.create(&done_img).await.unwrap();
        jobs.set_status(&done_job.id, JobStatus::Done, None).await.unwrap();

        // Fresh queue over a database that already has persisted work.
        let queue = OcrQueue::new(
            pool.clone(),
            storage,
            mock_ocr("resumed", None, None),
            Duration::from_secs(5),
            1,
        );
        queue.start().await.unwrap();

        assert!(wait_for_job_status(&pool, &queued_job.id, JobStatus::Done).await);
        // The superseded row gets re-enqueued; the executor re-runs the
        // latest (already done) row, which must land back on done.
        assert!(wait_for_job_status(&pool, &done_job.id, JobStatus::Done).await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // A job left working by a crash is not resumed.
        assert_eq!(
            jobs.get(&working_job.id).await.unwrap().unwrap().status,
            JobStatus::Working
        );
        assert_eq!(
            jobs.get(&superseded_job.id).await.unwrap().unwrap().status,
            JobStatus::Queued
        );
    }

    struct TrackingOcr {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpineOcr for TrackingOcr {
        fn name(&self) -> &'static str {
            "tracking"
        }

        async fn extract(&self, _image_data: &[u8]) -> Result<SpineText, OcrError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SpineText {
                text: "spine".to_string(),
                title: None,
                author: None,
            })
        }
    }

    #[tokio::test]
    async fn test_double_enqueue_runs_one_job_at_a_time() {
        let pool = setup_pool().await;
        let storage = Arc::new(MemoryStorage::new());
        let image_id = insert_image(&pool, &storage, "originals/n.jpg").await;
        let jobs = JobRepository::new(&pool);
        let older = jobs.create(&image_id).await.unwrap();
        let newer = jobs.create(&image_id).await.unwrap();

        let ocr = Arc::new(TrackingOcr {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });

        // Sample working rows while the queue drains both entries.
        let working_max = Arc::new(AtomicUsize::new(0));
        let sampler = {
            let pool = pool.clone();
            let working_max = working_max.clone();
            tokio::spawn(async move {
                loop {
                    let (count,): (i64,) =
                        sqlx::query_as("SELECT COUNT(*) FROM ocr_jobs WHERE status = 'working'")
                            .fetch_one(&pool)
                            .await
                            .unwrap();
                    working_max.fetch_max(count as usize, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let queue = OcrQueue::new(
            pool.clone(),
            storage,
            ocr.clone(),
            Duration::from_secs(5),
            1,
        );
        queue.enqueue(&image_id);
        queue.enqueue(&image_id);

        for _ in 0..200 {
            if ocr.calls.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 2);
        assert!(wait_for_job_status(&pool, &newer.id, JobStatus::Done).await);
        sampler.abort();

        // Never two executions, never two working rows, at any instant.
        assert_eq!(ocr.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(working_max.load(Ordering::SeqCst) <= 1);

        // Both entries resolved to the newest row; the older stays queued.
        assert_eq!(
            jobs.get(&older.id).await.unwrap().unwrap().status,
            JobStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_queue_survives_failed_jobs() {
        let pool = setup_pool().await;
        let storage = Arc::new(MemoryStorage::new());
        let good = insert_image(&pool, &storage, "originals/k.jpg").await;
        let jobs = JobRepository::new(&pool);
        let bad_job = jobs.create("ghost-image").await.unwrap();
        let good_job = jobs.create(&good).await.unwrap();

        let queue = OcrQueue::new(
            pool.clone(),
            storage,
            mock_ocr("after failure", None, None),
            Duration::from_secs(5),
            1,
        );
        queue.enqueue("ghost-image");
        queue.enqueue(&good);

        assert!(wait_for_job_status(&pool, &bad_job.id, JobStatus::Error).await);
        assert!(wait_for_job_status(&pool, &good_job.id, JobStatus::Done).await);
    }
}
