//! End to end tests driving jobs through the service.

#[cfg(test)]
mod tests {
    use crate::collaborators::{ProbeResponse, StoryBoard, StoryPart};
    use crate::config::PipelineConfig;
    use crate::core::{
        JobRecord, JobRequest, JobState, StepArtifact, StepList, StepStatus, CACHE_HIT_DETAIL,
    };
    use crate::errors::{ComicflowError, FetchError};
    use crate::fingerprint::fingerprint_request;
    use crate::pipeline::{
        image_step_name, initial_steps, RetryConfig, SummaryArtifact, CACHE_CHECK_STEP,
        FETCH_CONTENT_STEP, FINALIZED_DETAIL, FINALIZE_STEP, SUMMARIZE_STEP, VALIDATE_URL_STEP,
    };
    use crate::store::JobStore;
    use crate::testing::{
        assert_completion_invariant, assert_single_in_progress, assert_step, assert_steps_after,
        wait_for_terminal, ScriptedFetcher, ScriptedGenerator, ScriptedSynthesizer, StaticProbe,
        TestHarness, SAMPLE_ARTICLE,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const URL: &str = "https://example.com/lighthouse";
    const WAIT: Duration = Duration::from_secs(5);

    fn harness_with(
        probe: StaticProbe,
        generator: ScriptedGenerator,
        synthesizer: ScriptedSynthesizer,
    ) -> TestHarness {
        TestHarness::from_parts(
            ScriptedFetcher::always(SAMPLE_ARTICLE),
            probe,
            generator,
            synthesizer,
            TestHarness::default_config(),
        )
    }

    fn board(parts: &[(&str, &str)]) -> StoryBoard {
        StoryBoard {
            title: "Handmade".to_string(),
            parts: parts
                .iter()
                .map(|(summary, prompt)| StoryPart {
                    summary: (*summary).to_string(),
                    prompt: (*prompt).to_string(),
                })
                .collect(),
        }
    }

    /// Runs a 2-part job and checks `step` failed after three attempts
    /// with `error`, leaving every later step pending.
    async fn assert_retried_then_failed(harness: &TestHarness, step: &str, error: &str) -> JobRecord {
        let receipt = harness.service.submit(JobRequest::new(URL, 2)).await.unwrap();
        let view = wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();
        harness.service.wait_idle().await;

        assert_eq!(view.state, JobState::Failed);
        assert_eq!(
            harness.sink.step_details(step),
            vec![
                None,
                Some("Retry attempt 1/3".to_string()),
                Some("Retry attempt 2/3".to_string()),
                Some(format!("Error: {error}")),
            ]
        );
        let expected = format!("Error: {error}");
        assert_step(&view.record, step, StepStatus::Error, Some(expected.as_str()));
        assert_steps_after(&view.record, step, StepStatus::Pending);
        view.record
    }

    #[tokio::test]
    async fn test_short_article_is_retried_then_fails() {
        let harness = TestHarness::from_parts(
            ScriptedFetcher::always("too short"),
            StaticProbe::html(),
            ScriptedGenerator::new(),
            ScriptedSynthesizer::new(),
            TestHarness::default_config(),
        );

        assert_retried_then_failed(
            &harness,
            FETCH_CONTENT_STEP,
            "Article content too short or invalid",
        )
        .await;
        assert_eq!(harness.fetcher.call_count(), 3);
        assert_eq!(harness.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_part_count_is_retried_then_fails() {
        let harness = harness_with(
            StaticProbe::html(),
            ScriptedGenerator::new().with_board(ScriptedGenerator::board_for(1)),
            ScriptedSynthesizer::new(),
        );

        let record = assert_retried_then_failed(
            &harness,
            SUMMARIZE_STEP,
            "Expected 2 parts but received 1",
        )
        .await;
        assert_eq!(harness.generator.call_count(), 3);
        assert!(record.summaries.is_empty());
        assert!(record.title.is_none());
    }

    #[tokio::test]
    async fn test_short_summary_is_retried_then_fails() {
        let harness = harness_with(
            StaticProbe::html(),
            ScriptedGenerator::new().with_board(board(&[
                ("Too short", "a keeper climbs the stairs"),
                ("The lamp is lit for the last time.", "a lamp"),
            ])),
            ScriptedSynthesizer::new(),
        );

        assert_retried_then_failed(&harness, SUMMARIZE_STEP, "Invalid summary for part 1").await;
        assert_eq!(harness.generator.call_count(), 3);
        assert_eq!(harness.synthesizer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_prompt_is_retried_then_fails() {
        let harness = harness_with(
            StaticProbe::html(),
            ScriptedGenerator::new().with_board(board(&[
                ("The keeper climbs the stairs at dusk.", "a keeper on a staircase"),
                ("The lamp is lit for the last time.", "   "),
            ])),
            ScriptedSynthesizer::new(),
        );

        assert_retried_then_failed(&harness, SUMMARIZE_STEP, "Invalid image prompt for part 2").await;
        assert_eq!(harness.generator.call_count(), 3);
        assert_eq!(harness.synthesizer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_fetch_failures_recover() {
        let harness = TestHarness::from_parts(
            ScriptedFetcher::always(SAMPLE_ARTICLE)
                .with_failures(2, FetchError::Request("connection reset".into())),
            StaticProbe::html(),
            ScriptedGenerator::new(),
            ScriptedSynthesizer::new(),
            TestHarness::default_config(),
        );

        let receipt = harness.service.submit(JobRequest::new(URL, 1)).await.unwrap();
        let view = wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();

        assert_completion_invariant(&view.record);
        assert_eq!(harness.fetcher.call_count(), 3);
    }

    #[tokio::test]
    async fn test_missing_page_is_not_retried() {
        let harness = TestHarness::from_parts(
            ScriptedFetcher::always(SAMPLE_ARTICLE).with_failures(
                3,
                FetchError::Status {
                    status: 404,
                    url: URL.to_string(),
                },
            ),
            StaticProbe::html(),
            ScriptedGenerator::new(),
            ScriptedSynthesizer::new(),
            TestHarness::default_config(),
        );

        let receipt = harness.service.submit(JobRequest::new(URL, 1)).await.unwrap();
        let view = wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();

        assert_eq!(view.state, JobState::Failed);
        assert_eq!(harness.fetcher.call_count(), 1);
        assert_eq!(
            harness.sink.step_details(FETCH_CONTENT_STEP),
            vec![None, Some(format!("Error: Unexpected HTTP status 404 for {URL}"))]
        );
    }

    #[tokio::test]
    async fn test_record_without_steps_is_failed_and_never_resumed() {
        let harness = TestHarness::new();
        let request = JobRequest::new(URL, 2);
        let job_id = fingerprint_request(&request);
        harness
            .store
            .insert(JobRecord::new(job_id.clone(), &request, StepList::default()))
            .await
            .unwrap();

        assert_eq!(harness.service.status(&job_id).await.unwrap().state, JobState::Failed);
        assert!(harness.service.resume_interrupted().await.unwrap().is_empty());
        assert!(harness.service.resume_interrupted().await.unwrap().is_empty());
        harness.service.wait_idle().await;

        assert!(harness.sink.events_of_type("pipeline.").is_empty());
        assert_eq!(harness.fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_three_part_job_completes() {
        let harness = TestHarness::new();
        let request = JobRequest::new(URL, 3);

        let receipt = harness.service.submit(request.clone()).await.unwrap();
        assert!(receipt.created);
        assert_eq!(receipt.job_id, fingerprint_request(&request));

        let view = wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();
        let record = view.record;

        assert_completion_invariant(&record);
        assert!(!view.from_cache);
        assert_eq!(record.steps.len(), 8);
        assert!(record.steps.all_complete());
        assert_step(&record, FINALIZE_STEP, StepStatus::Complete, Some(FINALIZED_DETAIL));
        assert_eq!(record.title.as_deref(), Some("The Scripted Story"));
        assert_eq!(
            record.summaries[2],
            "Summary of part 3, in which things happen."
        );
        let refs: Vec<_> = record.image_refs.iter().map(|r| r.as_str().to_string()).collect();
        assert_eq!(
            refs,
            vec![
                "https://images.example.com/1.png",
                "https://images.example.com/2.png",
                "https://images.example.com/3.png",
            ]
        );

        harness.service.wait_idle().await;
        assert_eq!(harness.sink.events_of_type("pipeline.completed").len(), 1);
        assert!(!harness.service.is_running(&receipt.job_id));
    }

    #[tokio::test]
    async fn test_duplicate_submission_shares_job() {
        let harness = harness_with(
            StaticProbe::html(),
            ScriptedGenerator::new().with_delay(Duration::from_millis(50)),
            ScriptedSynthesizer::new(),
        );

        let first = harness.service.submit(JobRequest::new(URL, 2)).await.unwrap();
        let second = harness.service.submit(JobRequest::new(URL, 2)).await.unwrap();
        assert_eq!(first.job_id, second.job_id);
        assert!(first.created);
        assert!(!second.created);

        harness.service.wait_idle().await;
        assert_eq!(harness.generator.call_count(), 1);
        assert_eq!(harness.store.len(), 1);
    }

    #[tokio::test]
    async fn test_different_part_counts_are_different_jobs() {
        let harness = TestHarness::new();
        let two = harness.service.submit(JobRequest::new(URL, 2)).await.unwrap();
        let three = harness.service.submit(JobRequest::new(URL, 3)).await.unwrap();
        assert_ne!(two.job_id, three.job_id);
        harness.service.wait_idle().await;
    }

    #[tokio::test]
    async fn test_non_html_url_fails_and_leaves_later_steps_pending() {
        let harness = harness_with(
            StaticProbe::new(ProbeResponse::new(200, Some("application/pdf"))),
            ScriptedGenerator::new(),
            ScriptedSynthesizer::new(),
        );

        let receipt = harness.service.submit(JobRequest::new(URL, 2)).await.unwrap();
        let view = wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();
        let record = view.record;

        assert_eq!(view.state, JobState::Failed);
        assert_step(&record, CACHE_CHECK_STEP, StepStatus::Complete, None);
        assert_step(&record, VALIDATE_URL_STEP, StepStatus::Error, None);
        let detail = record.steps.get(VALIDATE_URL_STEP).unwrap().detail.clone().unwrap();
        assert!(detail.starts_with("Error: "), "{detail}");
        assert!(detail.contains("application/pdf"), "{detail}");
        assert_steps_after(&record, VALIDATE_URL_STEP, StepStatus::Pending);

        harness.service.wait_idle().await;
        assert_eq!(harness.fetcher.call_count(), 0);
        assert_eq!(harness.sink.events_of_type("pipeline.failed").len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let harness = harness_with(
            StaticProbe::html(),
            ScriptedGenerator::failing(2),
            ScriptedSynthesizer::new(),
        );

        let receipt = harness.service.submit(JobRequest::new(URL, 1)).await.unwrap();
        let view = wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();

        assert_eq!(view.state, JobState::Succeeded);
        assert_eq!(harness.generator.call_count(), 3);

        let details = harness.sink.step_details(SUMMARIZE_STEP);
        assert!(details.contains(&Some("Retry attempt 1/3".to_string())), "{details:?}");
        assert!(details.contains(&Some("Retry attempt 2/3".to_string())), "{details:?}");
        assert!(!details.contains(&Some("Retry attempt 3/3".to_string())), "{details:?}");
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_step() {
        let harness = harness_with(
            StaticProbe::html(),
            ScriptedGenerator::failing(3),
            ScriptedSynthesizer::new(),
        );

        let receipt = harness.service.submit(JobRequest::new(URL, 2)).await.unwrap();
        let view = wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();
        let record = view.record;

        assert_eq!(view.state, JobState::Failed);
        assert_eq!(harness.generator.call_count(), 3);
        assert_step(
            &record,
            SUMMARIZE_STEP,
            StepStatus::Error,
            Some("Error: Request failed: scripted generation failure"),
        );
        assert_steps_after(&record, SUMMARIZE_STEP, StepStatus::Pending);
        assert!(record.summaries.is_empty());
        assert_eq!(harness.synthesizer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_image_keeps_earlier_results() {
        let harness = harness_with(
            StaticProbe::html(),
            ScriptedGenerator::new(),
            ScriptedSynthesizer::new().with_failures(3),
        );

        let receipt = harness.service.submit(JobRequest::new(URL, 2)).await.unwrap();
        let record = wait_for_terminal(&harness.service, &receipt.job_id, WAIT)
            .await
            .unwrap()
            .record;

        assert_step(&record, SUMMARIZE_STEP, StepStatus::Complete, None);
        assert_step(&record, &image_step_name(1), StepStatus::Error, None);
        assert_steps_after(&record, &image_step_name(1), StepStatus::Pending);
        assert_eq!(record.summaries.len(), 2);
        assert!(record.image_refs.is_empty());
    }

    #[tokio::test]
    async fn test_regenerate_after_failure_succeeds() {
        let harness = harness_with(
            StaticProbe::html(),
            ScriptedGenerator::failing(3),
            ScriptedSynthesizer::new(),
        );
        let receipt = harness.service.submit(JobRequest::new(URL, 2)).await.unwrap();
        let failed = wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();
        assert_eq!(failed.state, JobState::Failed);
        harness.service.wait_idle().await;

        harness.service.regenerate(&receipt.job_id).await.unwrap();
        let view = wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();

        assert_completion_invariant(&view.record);
        assert_eq!(harness.generator.call_count(), 4);
        assert_eq!(view.record.created_at, failed.record.created_at);
    }

    #[tokio::test]
    async fn test_regenerate_replaces_results() {
        let harness = TestHarness::new();
        let receipt = harness.service.submit(JobRequest::new(URL, 1)).await.unwrap();
        wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();
        harness.service.wait_idle().await;

        harness.service.regenerate(&receipt.job_id).await.unwrap();
        harness.service.wait_idle().await;

        let view = harness.service.status(&receipt.job_id).await.unwrap();
        assert_completion_invariant(&view.record);
        assert!(!view.from_cache);
        assert_eq!(view.record.image_refs[0].as_str(), "https://images.example.com/2.png");
    }

    #[tokio::test]
    async fn test_regenerate_while_running_is_rejected() {
        let harness = harness_with(
            StaticProbe::html(),
            ScriptedGenerator::new().with_delay(Duration::from_millis(200)),
            ScriptedSynthesizer::new(),
        );
        let receipt = harness.service.submit(JobRequest::new(URL, 1)).await.unwrap();
        assert!(harness.service.is_running(&receipt.job_id));

        let err = harness.service.regenerate(&receipt.job_id).await.unwrap_err();
        assert!(matches!(err, ComicflowError::AlreadyRunning(_)));

        harness.service.wait_idle().await;
        assert_completion_invariant(&harness.service.status(&receipt.job_id).await.unwrap().record);
    }

    #[tokio::test]
    async fn test_stage_timeout_fails_the_step() {
        let config = TestHarness::default_config().with_pipeline(
            PipelineConfig::default()
                .with_retry(RetryConfig::immediate())
                .with_stage_timeout(0.05),
        );
        let harness = TestHarness::from_parts(
            ScriptedFetcher::always(SAMPLE_ARTICLE),
            StaticProbe::html(),
            ScriptedGenerator::new().with_delay(Duration::from_millis(500)),
            ScriptedSynthesizer::new(),
            config,
        );

        let receipt = harness.service.submit(JobRequest::new(URL, 1)).await.unwrap();
        let view = wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();

        assert_eq!(view.state, JobState::Failed);
        let step = view.record.steps.get(SUMMARIZE_STEP).unwrap();
        assert_eq!(step.status, StepStatus::Error);
        assert!(step.detail.as_deref().unwrap().contains("timed out"));
        assert_eq!(harness.generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_resubmitting_completed_job_is_cache_hit() {
        let harness = TestHarness::new();
        let receipt = harness.service.submit(JobRequest::new(URL, 2)).await.unwrap();
        wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();
        harness.service.wait_idle().await;

        let again = harness.service.submit(JobRequest::new(URL, 2)).await.unwrap();
        assert!(!again.created);
        assert!(!harness.service.is_running(&again.job_id));

        let view = harness.service.status(&again.job_id).await.unwrap();
        assert!(view.from_cache);
        assert_eq!(view.state, JobState::Succeeded);
        assert_step(&view.record, CACHE_CHECK_STEP, StepStatus::Complete, Some(CACHE_HIT_DETAIL));
        assert_eq!(harness.generator.call_count(), 1);
        assert_eq!(harness.sink.events_of_type("pipeline.cache_hit").len(), 1);
    }

    #[tokio::test]
    async fn test_resume_interrupted_job_skips_completed_steps() {
        let harness = TestHarness::new();
        let request = JobRequest::new(URL, 2);
        let job_id = fingerprint_request(&request);

        let mut record = JobRecord::new(job_id.clone(), &request, initial_steps(2));
        let board = ScriptedGenerator::board_for(2);
        let artifact = SummaryArtifact {
            summaries: board.summaries(),
            prompts: board.prompts(),
        };
        let done = [
            (CACHE_CHECK_STEP, None),
            (VALIDATE_URL_STEP, None),
            (FETCH_CONTENT_STEP, Some(StepArtifact::text(SAMPLE_ARTICLE))),
            (
                SUMMARIZE_STEP,
                Some(StepArtifact::text(serde_json::to_string(&artifact).unwrap())),
            ),
        ];
        for (step, artifact) in done {
            record
                .steps
                .apply(&job_id, step, StepStatus::Complete, None, artifact)
                .unwrap();
        }
        record.summaries = board.summaries();
        harness.store.insert(record).await.unwrap();

        let resumed = harness.service.resume_interrupted().await.unwrap();
        assert_eq!(resumed, vec![job_id.clone()]);
        harness.service.wait_idle().await;

        let view = harness.service.status(&job_id).await.unwrap();
        assert_completion_invariant(&view.record);
        assert_eq!(harness.fetcher.call_count(), 0);
        assert_eq!(harness.generator.call_count(), 0);
        assert_eq!(harness.synthesizer.call_count(), 2);
        assert!(harness.synthesizer.prompts()[0].contains("Panel 1"));

        assert!(harness.service.resume_interrupted().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_steps_progress_monotonically() {
        let harness = harness_with(
            StaticProbe::html(),
            ScriptedGenerator::new().with_delay(Duration::from_millis(20)),
            ScriptedSynthesizer::new().with_delay(Duration::from_millis(20)),
        );
        let receipt = harness.service.submit(JobRequest::new(URL, 3)).await.unwrap();

        let mut completed = 0;
        loop {
            let view = harness.service.status(&receipt.job_id).await.unwrap();
            assert_single_in_progress(&view.record);
            let now = view.record.steps.completed_names().len();
            assert!(now >= completed, "completed steps went from {completed} to {now}");
            completed = now;
            if view.state.is_terminal() {
                assert_eq!(view.state, JobState::Succeeded);
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        harness.service.wait_idle().await;
    }

    #[tokio::test]
    async fn test_prompt_overrides_reach_collaborators() {
        let harness = TestHarness::new();
        let request = JobRequest::new(URL, 1)
            .with_summary_prompt("Tell it in ${numParts} beats")
            .with_image_prompt("Ink sketch: ${prompt}");

        let receipt = harness.service.submit(request).await.unwrap();
        wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();

        assert_eq!(
            harness.generator.seen_overrides(),
            vec![Some("Tell it in ${numParts} beats".to_string())]
        );
        assert!(harness.synthesizer.prompts()[0].starts_with("Ink sketch: Panel 1"));
    }

    #[tokio::test]
    async fn test_inline_images_are_accepted() {
        let harness = harness_with(
            StaticProbe::html(),
            ScriptedGenerator::new(),
            ScriptedSynthesizer::inline(),
        );
        let receipt = harness.service.submit(JobRequest::new(URL, 2)).await.unwrap();
        let view = wait_for_terminal(&harness.service, &receipt.job_id, WAIT).await.unwrap();

        assert_completion_invariant(&view.record);
        assert!(view.record.image_refs.iter().all(|r| r.is_inline()));
        // inline payloads are never probed
        assert_eq!(harness.probe.probed(), vec![URL.to_string()]);
    }
}
