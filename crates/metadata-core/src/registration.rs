//! Links files into draft registrations and registries, waiting for server-side jobs.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::context::NodeContext;
use crate::drafts::RegistrationChange;
use crate::error::Result;
use crate::store::{JobProgress, MetadataStore};
use crate::timer::Timer;

/// Outcome of one register or deregister request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationResult {
    pub target_id: String,
    pub checked: bool,
    /// URL reported by a finished job, if the request started one.
    pub result: Option<String>,
}

pub struct RegistrationPoller {
    store: MetadataStore,
    timer: Arc<dyn Timer>,
    interval: Duration,
}

impl RegistrationPoller {
    pub fn new(store: MetadataStore, timer: Arc<dyn Timer>, interval: Duration) -> Self {
        Self {
            store,
            timer,
            interval,
        }
    }

    /// Register (PUT) or deregister (DELETE) `path` with one target.
    ///
    /// `home_base_url` is the metadata base URL of the node owning the drafts.
    pub async fn update_registration(
        &self,
        home_base_url: &str,
        context: &NodeContext,
        path: &str,
        change: &RegistrationChange,
    ) -> Result<RegistrationResult> {
        let url = change.target.url(home_base_url, &context.node_id, path);
        debug!(
            "{} {} with {}",
            if change.checked { "Registering" } else { "Deregistering" },
            path,
            change.target.id()
        );
        let progress_url = self.store.update_registration(&url, change.checked).await?;
        let result = match progress_url {
            Some(progress_url) => Some(self.wait_for_registration(&progress_url).await?),
            None => None,
        };
        Ok(RegistrationResult {
            target_id: change.target.id().to_string(),
            checked: change.checked,
            result,
        })
    }

    /// Poll a registration job until it reports a result.
    ///
    /// A 404 means the job is not visible yet and is polled again without limit.
    pub async fn wait_for_registration(&self, progress_url: &str) -> Result<String> {
        loop {
            self.timer.sleep(self.interval).await;
            match self.store.registration_progress(progress_url).await {
                Ok(JobProgress::Finished(result)) => {
                    info!("Registration job finished: {}", result);
                    return Ok(result);
                }
                Ok(JobProgress::Running) => {
                    debug!("Registration job still running: {}", progress_url)
                }
                Err(e) if e.is_not_found() => {
                    debug!("Registration job not found yet: {}", progress_url)
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply every change concurrently, then return the results or the first error.
    ///
    /// All requests run to completion even when one of them fails.
    pub async fn update_all(
        &self,
        home_base_url: &str,
        context: &NodeContext,
        path: &str,
        changes: &[RegistrationChange],
    ) -> Result<Vec<RegistrationResult>> {
        join_all(
            changes
                .iter()
                .map(|change| self.update_registration(home_base_url, context, path, change)),
        )
        .await
        .into_iter()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drafts::RegistrationTarget;
    use crate::http::Method;
    use crate::memory::ProgressStep;
    use crate::model::Registry;
    use crate::testing::Fixture;
    use serde_json::json;

    const PROGRESS: &str = "https://rdm.example.org/progress/job-1";

    fn poller(fixture: &Fixture) -> RegistrationPoller {
        RegistrationPoller::new(
            fixture.store(),
            fixture.timer.clone(),
            fixture.config.poll_interval,
        )
    }

    fn registry_change() -> RegistrationChange {
        RegistrationChange {
            target: RegistrationTarget::Registry(Registry {
                id: "jpdr".into(),
                url: "https://registry.example.org/files".into(),
                name: None,
            }),
            checked: true,
        }
    }

    fn draft_change(id: &str, checked: bool) -> RegistrationChange {
        RegistrationChange {
            target: RegistrationTarget::Draft(id.into()),
            checked,
        }
    }

    async fn loaded() -> (Fixture, Arc<NodeContext>) {
        let fixture = Fixture::new();
        fixture.add_node("abc12", Vec::new());
        let context = fixture.load("abc12").await;
        (fixture, context)
    }

    #[tokio::test]
    async fn test_polls_until_result() {
        let (fixture, context) = loaded().await;
        fixture.server.set_registration(
            "https://registry.example.org/files/abc12/osfstorage/a.txt",
            json!({"data": {"attributes": {"progress_url": PROGRESS}}}),
        );
        fixture.server.script_progress(
            PROGRESS,
            vec![
                ProgressStep::Running,
                ProgressStep::Finished("https://registry.example.org/r/1".into()),
            ],
        );

        let result = poller(&fixture)
            .update_registration(
                &Fixture::base("abc12"),
                &context,
                "osfstorage/a.txt",
                &registry_change(),
            )
            .await
            .unwrap();
        assert_eq!(
            result.result.as_deref(),
            Some("https://registry.example.org/r/1")
        );
        assert_eq!(
            fixture.timer.sleeps(),
            vec![Duration::from_millis(500), Duration::from_millis(500)]
        );
        assert_eq!(fixture.server.request_count(Method::Get, "job-1"), 2);
        assert_eq!(
            fixture
                .server
                .request_count(Method::Put, "abc12/osfstorage/a.txt"),
            1
        );
    }

    #[tokio::test]
    async fn test_not_found_keeps_polling() {
        let (fixture, _context) = loaded().await;
        fixture.server.script_progress(
            PROGRESS,
            vec![
                ProgressStep::NotFound,
                ProgressStep::NotFound,
                ProgressStep::NotFound,
                ProgressStep::Finished("/r/2".into()),
            ],
        );

        let result = poller(&fixture).wait_for_registration(PROGRESS).await.unwrap();
        assert_eq!(result, "/r/2");
        assert_eq!(fixture.timer.sleeps().len(), 4);
    }

    #[tokio::test]
    async fn test_server_error_ends_polling() {
        let (fixture, _context) = loaded().await;
        fixture.server.script_progress(
            PROGRESS,
            vec![ProgressStep::Running, ProgressStep::Fail(500)],
        );

        let err = poller(&fixture)
            .wait_for_registration(PROGRESS)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(fixture.server.request_count(Method::Get, "job-1"), 2);
    }

    #[tokio::test]
    async fn test_no_progress_url_completes_immediately() {
        let (fixture, context) = loaded().await;
        let draft_url = format!(
            "{}draft_registrations/d1/files/abc12/osfstorage/a.txt",
            Fixture::base("abc12")
        );
        fixture.server.set_registration(&draft_url, json!({"data": {"attributes": {}}}));

        let result = poller(&fixture)
            .update_registration(
                &Fixture::base("abc12"),
                &context,
                "osfstorage/a.txt",
                &draft_change("d1", false),
            )
            .await
            .unwrap();
        assert_eq!(result.result, None);
        assert!(!result.checked);
        assert_eq!(fixture.server.request_count(Method::Delete, "abc12/osfstorage/a.txt"), 1);
        assert!(fixture.timer.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_update_all_finishes_siblings_before_failing() {
        let (fixture, context) = loaded().await;
        let base = Fixture::base("abc12");
        let ok_url = format!("{base}draft_registrations/d1/files/abc12/osfstorage/a.txt");
        fixture.server.set_registration(
            &ok_url,
            json!({"data": {"attributes": {"progress_url": PROGRESS}}}),
        );
        fixture.server.script_progress(
            PROGRESS,
            vec![ProgressStep::Running, ProgressStep::Finished("/r/3".into())],
        );
        fixture.server.fail_next(
            Method::Put,
            "draft_registrations/d2/files/abc12/osfstorage/a.txt",
            403,
        );

        let err = poller(&fixture)
            .update_all(
                &base,
                &context,
                "osfstorage/a.txt",
                &[draft_change("d1", true), draft_change("d2", true)],
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(fixture.server.request_count(Method::Get, "job-1"), 2);
    }
}
