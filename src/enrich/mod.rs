pub mod progress;

use std::path::Path;
use std::time::Duration;

use colored::Colorize;
use eyre::Result;
use log::{debug, info, warn};

use crate::models::job::{JobRecord, RecordStatus};
use crate::models::stats::RunStats;
use crate::scraper::canonical::Canonicalizer;
use crate::scraper::extractor::{Extraction, Extractor};
use crate::scraper::fetcher::PageFetcher;
use crate::storage::dump::DumpWriter;
use crate::storage::records::RecordStore;
use crate::utils::delay::sleep_jittered;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichMode {
    /// Leave records that already have a description alone
    MissingOnly,
    /// Re-fetch every record
    All,
}

#[derive(Debug, Clone)]
pub struct EnrichOptions {
    pub mode: EnrichMode,
    /// Cap on attempted records; skipped ones don't count
    pub limit: Option<usize>,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub progress_every: usize,
}

/// Where a record is in its enrichment cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fetching,
    Extracting,
}

/// Walks the store one record at a time, fetching and extracting
/// descriptions and persisting the store after every success.
pub struct Enricher<F> {
    fetcher: F,
    canonicalizer: Canonicalizer,
    extractor: Extractor,
    dumps: DumpWriter,
    options: EnrichOptions,
}

impl<F: PageFetcher> Enricher<F> {
    pub fn new(
        fetcher: F,
        canonicalizer: Canonicalizer,
        extractor: Extractor,
        dumps: DumpWriter,
        options: EnrichOptions,
    ) -> Self {
        Self {
            fetcher,
            canonicalizer,
            extractor,
            dumps,
            options,
        }
    }

    pub fn into_fetcher(self) -> F {
        self.fetcher
    }

    fn wants(&self, record: &JobRecord) -> bool {
        record.has_url()
            && (self.options.mode == EnrichMode::All || !record.has_description())
    }

    /// Runs the batch. Only fatal errors (engine init, unwritable output)
    /// come back as `Err`; per-record failures end up in the stats.
    pub async fn run(&self, store: &mut RecordStore, output: &Path) -> Result<RunStats> {
        let mut stats = RunStats::new();

        let pending = store.records().iter().filter(|r| self.wants(r)).count();
        let planned = self.options.limit.map_or(pending, |limit| limit.min(pending));
        info!(
            "{} of {} records need a description, processing {}",
            pending.to_string().cyan(),
            store.len(),
            planned.to_string().cyan()
        );

        if store.is_dirty() {
            store.persist(output)?;
        }

        for position in 0..store.len() {
            let Some(record) = store.get(position).cloned() else {
                break;
            };

            if !record.has_url() {
                warn!("record {} ({:?}) has no url, skipping", position + 1, record.title);
                stats.record_skip();
                continue;
            }
            if !self.wants(&record) {
                debug!("already enriched, skipping {}", record.url);
                stats.record_skip();
                continue;
            }
            if self.options.limit.is_some_and(|limit| stats.attempted >= limit) {
                info!("processing limit of {} reached", stats.attempted);
                break;
            }

            if stats.attempted > 0 {
                let waited = sleep_jittered(self.options.min_delay, self.options.max_delay).await;
                debug!("waited {:.1?} before next request", waited);
            }

            stats.record_attempt();
            info!(
                "[{}/{}] {} at {}",
                stats.attempted,
                planned,
                record.title.bold(),
                record.company
            );

            if let Some(extraction) = self.enrich_one(&record, &mut stats).await? {
                let chars = extraction.description.chars().count();

                let mut update = JobRecord::new("", "", "", record.url.clone());
                update.description = Some(extraction.description);
                update.posted_date = extraction.posted_date;
                store.upsert(update);
                store.persist(output)?;

                stats.record_success(&record.url);
                info!(
                    "{} description: {} chars (via {})",
                    "✓".green(),
                    chars,
                    extraction.strategy
                );
            }

            if self.options.progress_every > 0 && stats.attempted % self.options.progress_every == 0 {
                info!("progress: {}", stats);
            }
        }

        info!("completed: {}", stats);
        let still_pending = store
            .records()
            .iter()
            .filter(|r| r.has_url() && r.status(stats.has_failed(&r.url)) == RecordStatus::Pending)
            .count();
        if still_pending > 0 {
            info!("{} records still pending", still_pending);
        }
        for failure in &stats.failures {
            warn!("  {} {}: {}", "✗".red(), failure.url, failure.reason);
        }
        info!("results saved to {}", output.display());

        Ok(stats)
    }

    /// Fetch and extract a single record. `Ok(None)` is a recorded,
    /// recoverable failure.
    async fn enrich_one(&self, record: &JobRecord, stats: &mut RunStats) -> Result<Option<Extraction>> {
        let canonical = self.canonicalizer.canonicalize(&record.url);
        let dump_key = canonical
            .job_key
            .clone()
            .unwrap_or_else(|| record.url.clone());

        match &canonical.job_key {
            Some(key) => debug!("using canonical url for job key {}", key),
            None => debug!("no job key in url, using it as-is"),
        }

        debug!("{:?} {}", Phase::Fetching, canonical.url);
        let page = match self.fetcher.fetch(&canonical.url).await {
            Ok(page) => page,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!("{} {}: {}", "✗".red(), canonical.url, e);
                if let Some(content) = e.content() {
                    self.dumps.write(&dump_key, content);
                }
                stats.record_failure(&record.url, e.to_string());
                return Ok(None);
            }
        };

        if page.challenge_encountered {
            stats.record_challenge();
        }

        debug!("{:?} {} bytes from {}", Phase::Extracting, page.content.len(), page.url);
        match self.extractor.extract(&page.content) {
            Some(extraction) => Ok(Some(extraction)),
            None => {
                warn!("{} no description found on {}", "✗".red(), canonical.url);
                if let Some(path) = self.dumps.write(&dump_key, &page.content) {
                    info!("page saved to {} for inspection", path.display());
                }
                stats.record_failure(&record.url, "no description found");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::scraper::fetcher::testing::{ScriptedEngine, fast_config};
    use crate::scraper::fetcher::{FetchError, FetchedPage, Fetcher};
    use crate::utils::config::ConfigInner;

    enum Scripted {
        Page(String),
        ChallengeTimeout,
        Navigation,
        Init,
    }

    /// Serves canned pages by URL and, when asked, snapshots the output file
    /// at the start of every fetch.
    struct FakeFetcher {
        pages: HashMap<String, Scripted>,
        calls: Mutex<Vec<String>>,
        observe: Option<PathBuf>,
        snapshots: Mutex<Vec<usize>>,
    }

    impl FakeFetcher {
        fn new(pages: impl IntoIterator<Item = (String, Scripted)>) -> Self {
            Self {
                pages: pages.into_iter().collect(),
                calls: Mutex::new(Vec::new()),
                observe: None,
                snapshots: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());

            if let Some(path) = &self.observe {
                let raw = fs::read_to_string(path).unwrap();
                let records: Vec<JobRecord> = serde_json::from_str(&raw).unwrap();
                let enriched = records.iter().filter(|r| r.has_description()).count();
                self.snapshots.lock().unwrap().push(enriched);
            }

            match self.pages.get(url) {
                Some(Scripted::Page(html)) => Ok(FetchedPage {
                    url: url.to_string(),
                    content: html.clone(),
                    challenge_encountered: false,
                }),
                Some(Scripted::ChallengeTimeout) => Err(FetchError::ChallengeTimeout {
                    waited: Duration::from_secs(15),
                    content: "<title>Just a moment...</title>".to_string(),
                }),
                Some(Scripted::Init) => Err(FetchError::Init("no chrome".to_string())),
                Some(Scripted::Navigation) | None => {
                    Err(FetchError::Navigation("net::ERR_NAME_NOT_RESOLVED".to_string()))
                }
            }
        }
    }

    fn options() -> EnrichOptions {
        EnrichOptions {
            mode: EnrichMode::MissingOnly,
            limit: None,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            progress_every: 2,
        }
    }

    fn enricher<F: PageFetcher>(fetcher: F, dumps: DumpWriter, options: EnrichOptions) -> Enricher<F> {
        let config = ConfigInner::default();
        Enricher::new(
            fetcher,
            Canonicalizer::new(&config.canonical).unwrap(),
            Extractor::new(&config.extractor).unwrap(),
            dumps,
            options,
        )
    }

    fn job_page(description: &str) -> String {
        format!(
            r#"<html><body><div id="jobDescriptionText">{description}</div>
            <div class="jobsearch-JobMetadataFooter">Posted 2 days ago</div></body></html>"#
        )
    }

    fn listing(key: &str) -> String {
        format!("https://ie.indeed.com/rc/clk?jk={key}&from=serp&vjs=3")
    }

    fn canonical(key: &str) -> String {
        format!("https://ie.indeed.com/viewjob?jk={key}")
    }

    fn write_input(dir: &Path, keys: &[&str]) -> PathBuf {
        let records: Vec<_> = keys
            .iter()
            .map(|key| {
                json!({
                    "title": format!("Engineer {key}"),
                    "company": "Acme",
                    "location": "Dublin",
                    "url": listing(key),
                    "source": "indeed"
                })
            })
            .collect();
        let path = dir.join("jobs.json");
        fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();
        path
    }

    fn long_text(seed: &str) -> String {
        format!("{seed} ").repeat(400 / (seed.len() + 1) + 1).trim().to_string()
    }

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_run() {
        init_logs();
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), &["a1", "b2", "c3"]);
        let output = dir.path().join("out.json");

        let fetcher = FakeFetcher::new([
            (canonical("a1"), Scripted::Page(job_page(&long_text("first")))),
            (canonical("b2"), Scripted::ChallengeTimeout),
            (canonical("c3"), Scripted::Page(job_page(&long_text("third")))),
        ]);
        let enricher = enricher(fetcher, DumpWriter::disabled(), options());

        let mut store = RecordStore::open(&input, &output).unwrap();
        let stats = enricher.run(&mut store, &output).await.unwrap();

        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(enricher.into_fetcher().calls().len(), 3);

        let saved = RecordStore::load(&output).unwrap();
        let second = saved.get_by_url(&listing("b2")).unwrap();
        assert!(second.description.is_none());
        assert_eq!(second.status(stats.has_failed(&listing("b2"))), RecordStatus::Failed);
        assert!(saved.get_by_url(&listing("c3")).unwrap().has_description());
        assert_eq!(
            saved.get_by_url(&listing("a1")).unwrap().posted_date.as_deref(),
            Some("Posted 2 days ago")
        );
        // pass-through fields survive
        assert_eq!(saved.get(0).unwrap().extra.get("source"), Some(&json!("indeed")));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), &["a1", "b2"]);
        let output = dir.path().join("out.json");
        let pages = || {
            [
                (canonical("a1"), Scripted::Page(job_page(&long_text("first")))),
                (canonical("b2"), Scripted::Page(job_page(&long_text("second")))),
            ]
        };

        let first = enricher(FakeFetcher::new(pages()), DumpWriter::disabled(), options());
        let mut store = RecordStore::open(&input, &output).unwrap();
        first.run(&mut store, &output).await.unwrap();
        let after_first = fs::read(&output).unwrap();

        let second = enricher(FakeFetcher::new(pages()), DumpWriter::disabled(), options());
        let mut store = RecordStore::open(&input, &output).unwrap();
        let stats = second.run(&mut store, &output).await.unwrap();

        assert_eq!(stats.attempted, 0);
        assert_eq!(stats.skipped, 2);
        assert!(second.into_fetcher().calls().is_empty());
        assert_eq!(fs::read(&output).unwrap(), after_first);
    }

    #[tokio::test]
    async fn output_is_written_before_the_next_record_starts() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), &["a1", "b2", "c3"]);
        let output = dir.path().join("out.json");

        let mut fetcher = FakeFetcher::new([
            (canonical("a1"), Scripted::Page(job_page(&long_text("first")))),
            (canonical("b2"), Scripted::Navigation),
            (canonical("c3"), Scripted::Page(job_page(&long_text("third")))),
        ]);
        fetcher.observe = Some(output.clone());
        let enricher = enricher(fetcher, DumpWriter::disabled(), options());

        let mut store = RecordStore::open(&input, &output).unwrap();
        enricher.run(&mut store, &output).await.unwrap();

        let fetcher = enricher.into_fetcher();
        assert_eq!(*fetcher.snapshots.lock().unwrap(), vec![0, 1, 1]);

        let saved = RecordStore::load(&output).unwrap();
        assert_eq!(saved.len(), 3);
        assert_eq!(
            saved.records().iter().filter(|r| r.has_description()).count(),
            2
        );
    }

    #[tokio::test]
    async fn limit_counts_attempts_not_skips() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.json");

        let mut done = JobRecord::new("Done", "Acme", "Cork", listing("a1"));
        done.description = Some(long_text("done"));
        let mut store = RecordStore::from_records([
            done,
            JobRecord::new("Two", "Acme", "Cork", listing("b2")),
            JobRecord::new("Three", "Acme", "Cork", listing("c3")),
        ]);

        let fetcher = FakeFetcher::new([
            (canonical("b2"), Scripted::Page(job_page(&long_text("two")))),
            (canonical("c3"), Scripted::Page(job_page(&long_text("three")))),
        ]);
        let mut opts = options();
        opts.limit = Some(1);
        let enricher = enricher(fetcher, DumpWriter::disabled(), opts);

        let stats = enricher.run(&mut store, &output).await.unwrap();

        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(enricher.into_fetcher().calls(), vec![canonical("b2")]);
        assert!(!store.get_by_url(&listing("c3")).unwrap().has_description());
    }

    #[tokio::test]
    async fn all_mode_refetches_enriched_records() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.json");

        let mut done = JobRecord::new("Done", "Acme", "Cork", listing("a1"));
        done.description = Some("stale".to_string());
        let mut store = RecordStore::from_records([done]);

        let fresh = long_text("fresh");
        let fetcher = FakeFetcher::new([(canonical("a1"), Scripted::Page(job_page(&fresh)))]);
        let mut opts = options();
        opts.mode = EnrichMode::All;
        let enricher = enricher(fetcher, DumpWriter::disabled(), opts);

        let stats = enricher.run(&mut store, &output).await.unwrap();

        assert_eq!(stats.succeeded, 1);
        assert_eq!(store.get(0).unwrap().description(), Some(fresh.as_str()));
    }

    #[tokio::test]
    async fn records_without_url_are_skipped_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.json");
        let mut store = RecordStore::from_records([JobRecord::new("Orphan", "Acme", "Cork", "")]);

        let enricher = enricher(FakeFetcher::new(Vec::new()), DumpWriter::disabled(), options());
        let stats = enricher.run(&mut store, &output).await.unwrap();

        assert_eq!(stats.skipped, 1);
        assert_eq!(RecordStore::load(&output).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_pages_are_dumped_by_job_key() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), &["a1", "b2"]);
        let output = dir.path().join("out.json");
        let dumps = dir.path().join("debug");

        let fetcher = FakeFetcher::new([
            (canonical("a1"), Scripted::Page("<html><body>Job expired</body></html>".to_string())),
            (canonical("b2"), Scripted::ChallengeTimeout),
        ]);
        let enricher = enricher(fetcher, DumpWriter::new(Some(dumps.clone())), options());

        let mut store = RecordStore::open(&input, &output).unwrap();
        let stats = enricher.run(&mut store, &output).await.unwrap();

        assert_eq!(stats.failed, 2);
        assert_eq!(stats.failures[0].reason, "no description found");
        assert!(
            fs::read_to_string(dumps.join("failed-a1.html"))
                .unwrap()
                .contains("Job expired")
        );
        assert!(dumps.join("failed-b2.html").exists());
    }

    #[tokio::test]
    async fn engine_failure_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), &["a1", "b2"]);
        let output = dir.path().join("out.json");

        let fetcher = FakeFetcher::new([(canonical("a1"), Scripted::Init)]);
        let enricher = enricher(fetcher, DumpWriter::disabled(), options());

        let mut store = RecordStore::open(&input, &output).unwrap();
        assert!(enricher.run(&mut store, &output).await.is_err());
        assert_eq!(enricher.into_fetcher().calls().len(), 1);
    }

    #[tokio::test]
    async fn challenge_clears_and_description_is_saved() {
        init_logs();
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), &["abc123"]);
        let output = dir.path().join("out.json");

        let description = "abcdefghij".repeat(300);
        let challenge = "<html><head><title>Just a moment...</title></head><body></body></html>";
        let engine = ScriptedEngine::with_contents([
            challenge.to_string(),
            challenge.to_string(),
            job_page(&description),
        ]);
        let fetcher = Fetcher::new(engine.clone(), fast_config());
        let enricher = enricher(fetcher, DumpWriter::disabled(), options());

        let mut store = RecordStore::open(&input, &output).unwrap();
        let stats = enricher.run(&mut store, &output).await.unwrap();

        assert_eq!(
            *engine.visited.lock().unwrap(),
            vec!["https://ie.indeed.com/viewjob?jk=abc123".to_string()]
        );
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.challenges, 1);

        let saved = RecordStore::load(&output).unwrap();
        let record = saved.get_by_url(&listing("abc123")).unwrap();
        assert_eq!(record.description().map(|d| d.chars().count()), Some(3000));
    }
}
