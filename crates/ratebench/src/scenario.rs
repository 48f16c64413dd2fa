//! Sequencing of named test cases into categories and rounds.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::LocalBoxFuture;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{
    executor::TimedExecutor,
    outcome::{Outcome, TestOutput},
    rate::RateController,
    round::{CategoryReport, RoundResult, SkippedTest},
};

/// Capabilities the runner needs from the system under test.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Moves the backend's notion of time forward. Only called between tests.
    async fn advance_time(&self, by: Duration) -> anyhow::Result<()>;
}

/// What a test case sees while it runs.
#[derive(Debug)]
pub struct TestContext<'a, B> {
    backend: &'a B,
    load: &'a RateController,
    category: &'a str,
    round: u32,
}

impl<'a, B> TestContext<'a, B> {
    pub const fn backend(&self) -> &'a B {
        self.backend
    }

    /// The configured load generator, for sweeps run from inside a test.
    pub const fn load(&self) -> &'a RateController {
        self.load
    }

    pub const fn category(&self) -> &'a str {
        self.category
    }

    pub const fn round(&self) -> u32 {
        self.round
    }
}

/// Body of a test case.
pub type TestFn<B> =
    Box<dyn for<'a> Fn(&'a TestContext<'a, B>) -> LocalBoxFuture<'a, anyhow::Result<TestOutput>>>;

/// A named test.
pub struct TestCase<B> {
    pub name: String,
    pub description: Option<String>,
    /// Set for bodies that issue many calls through [`TestContext::load`].
    pub drives_load: bool,
    pub run: TestFn<B>,
}

impl<B> TestCase<B> {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: for<'a> Fn(&'a TestContext<'a, B>) -> LocalBoxFuture<'a, anyhow::Result<TestOutput>>
            + 'static,
    {
        Self { name: name.into(), description: None, drives_load: false, run: Box::new(run) }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks the body as a load sweep. The runner then bounds it with the
    /// sweep executor; each call inside is still timed by the load generator.
    pub const fn drives_load(mut self) -> Self {
        self.drives_load = true;
        self
    }
}

/// One entry in a category's ordered step list.
pub enum Step<B> {
    Test(TestCase<B>),
    /// Wall-clock pause.
    Cooldown(Duration),
    /// Backend clock advance, delegated to [`Backend::advance_time`].
    AdvanceTime(Duration),
}

/// Ordered steps sharing a category label.
pub struct TestCategory<B> {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<Step<B>>,
}

impl<B> TestCategory<B> {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, steps: Vec::new() }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn test(mut self, case: TestCase<B>) -> Self {
        self.steps.push(Step::Test(case));
        self
    }

    pub fn cooldown(mut self, pause: Duration) -> Self {
        self.steps.push(Step::Cooldown(pause));
        self
    }

    pub fn advance_time(mut self, by: Duration) -> Self {
        self.steps.push(Step::AdvanceTime(by));
        self
    }

    pub fn tests(&self) -> impl Iterator<Item = &TestCase<B>> {
        self.steps.iter().filter_map(|step| match step {
            Step::Test(case) => Some(case),
            _ => None,
        })
    }
}

/// All categories of a scenario, in execution order.
pub struct TestSuite<B> {
    pub categories: Vec<TestCategory<B>>,
}

impl<B> Default for TestSuite<B> {
    fn default() -> Self {
        Self { categories: Vec::new() }
    }
}

impl<B> TestSuite<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: TestCategory<B>) -> Self {
        self.categories.push(category);
        self
    }

    pub fn test_count(&self, filter: Option<&str>) -> usize {
        self.categories
            .iter()
            .flat_map(|c| c.tests())
            .filter(|t| matches_filter(&t.name, filter))
            .count()
    }
}

/// Progress notifications emitted while a round runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TestEvent {
    TestStarted { category: String, name: String },
    TestPassed { category: String, name: String, duration: Duration },
    TestFailed { category: String, name: String, duration: Duration, error: String },
    TestSkipped { category: String, name: String, reason: String },
    TimeAdvanced { category: String, by: Duration },
    RoundComplete { round: u32, passed: usize, failed: usize, skipped: usize },
}

/// Runs a suite against one backend, one test at a time.
pub struct ScenarioRunner<'a, B> {
    backend: &'a B,
    load: RateController,
    executor: TimedExecutor,
    sweep_executor: TimedExecutor,
    cooldown: Option<Duration>,
    filter: Option<String>,
    events: Option<mpsc::Sender<TestEvent>>,
}

impl<'a, B: Backend> ScenarioRunner<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            load: RateController::default(),
            executor: TimedExecutor::new(),
            sweep_executor: TimedExecutor::new(),
            cooldown: None,
            filter: None,
            events: None,
        }
    }

    pub const fn with_load(mut self, load: RateController) -> Self {
        self.load = load;
        self
    }

    /// Executor for single-call tests.
    pub const fn with_executor(mut self, executor: TimedExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Executor for tests marked with [`TestCase::drives_load`].
    pub const fn with_sweep_executor(mut self, executor: TimedExecutor) -> Self {
        self.sweep_executor = executor;
        self
    }

    /// Pause inserted between consecutive tests.
    pub const fn with_cooldown(mut self, cooldown: Option<Duration>) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Only run tests whose name contains `filter`, or matches it as a `*` glob.
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<TestEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Runs every category in order and returns the round's result tree.
    ///
    /// A failing test never stops the round. A failed time advance skips the
    /// rest of that category, since the remaining tests depend on it.
    pub async fn run_round(&self, suite: &TestSuite<B>, round: u32) -> RoundResult {
        let filter = self.filter.as_deref();
        let mut collected: BTreeMap<String, Vec<Outcome>> = BTreeMap::new();
        let mut skipped = Vec::new();
        let mut ran_previous = false;

        info!(round, tests = suite.test_count(filter), "Starting round");

        for category in &suite.categories {
            let selected = category.tests().filter(|t| matches_filter(&t.name, filter)).count();
            if selected == 0 && filter.is_some() {
                continue;
            }
            let results = collected.entry(category.name.clone()).or_default();
            let mut halted: Option<String> = None;

            for step in &category.steps {
                match step {
                    Step::Test(case) => {
                        if !matches_filter(&case.name, filter) {
                            continue;
                        }
                        if let Some(reason) = &halted {
                            warn!(category = %category.name, test = %case.name, reason = %reason, "Skipping test");
                            skipped.push(SkippedTest {
                                category: category.name.clone(),
                                name: case.name.clone(),
                                reason: reason.clone(),
                            });
                            self.emit(TestEvent::TestSkipped {
                                category: category.name.clone(),
                                name: case.name.clone(),
                                reason: reason.clone(),
                            })
                            .await;
                            continue;
                        }
                        if ran_previous && let Some(pause) = self.cooldown {
                            tokio::time::sleep(pause).await;
                        }

                        let outcome = self.run_test(category, case, round).await;
                        results.push(outcome);
                        ran_previous = true;
                    }
                    Step::Cooldown(pause) => tokio::time::sleep(*pause).await,
                    Step::AdvanceTime(by) => {
                        if halted.is_some() {
                            continue;
                        }
                        match self.backend.advance_time(*by).await {
                            Ok(()) => {
                                info!(
                                    category = %category.name,
                                    by = %humantime::format_duration(*by),
                                    "Advanced backend time"
                                );
                                self.emit(TestEvent::TimeAdvanced {
                                    category: category.name.clone(),
                                    by: *by,
                                })
                                .await;
                            }
                            Err(e) => {
                                let reason = format!("time advance failed: {e:#}");
                                error!(category = %category.name, error = %reason, "Halting category");
                                halted = Some(reason);
                            }
                        }
                    }
                }
            }
        }

        let categories: BTreeMap<String, CategoryReport> = collected
            .into_iter()
            .map(|(name, results)| {
                let report = CategoryReport::from_results(&name, results);
                (name, report)
            })
            .collect();

        let result = RoundResult { round, timestamp: Utc::now(), categories, skipped };
        info!(
            round,
            passed = result.passed(),
            failed = result.failed(),
            skipped = result.skipped.len(),
            "Round complete"
        );
        self.emit(TestEvent::RoundComplete {
            round,
            passed: result.passed(),
            failed: result.failed(),
            skipped: result.skipped.len(),
        })
        .await;
        result
    }

    async fn run_test(&self, category: &TestCategory<B>, case: &TestCase<B>, round: u32) -> Outcome {
        self.emit(TestEvent::TestStarted { category: category.name.clone(), name: case.name.clone() })
            .await;

        let ctx = TestContext { backend: self.backend, load: &self.load, category: &category.name, round };
        let executor = if case.drives_load { &self.sweep_executor } else { &self.executor };
        let outcome = executor.run(&case.name, &category.name, || (case.run)(&ctx)).await;
        let duration = Duration::from_secs_f64(outcome.duration_ms() / 1000.0);

        match outcome.error() {
            None => {
                info!(
                    category = %category.name,
                    test = %case.name,
                    duration_ms = outcome.duration_ms(),
                    "Test passed"
                );
                self.emit(TestEvent::TestPassed {
                    category: category.name.clone(),
                    name: case.name.clone(),
                    duration,
                })
                .await;
            }
            Some(error) => {
                warn!(
                    category = %category.name,
                    test = %case.name,
                    duration_ms = outcome.duration_ms(),
                    error,
                    "Test failed"
                );
                self.emit(TestEvent::TestFailed {
                    category: category.name.clone(),
                    name: case.name.clone(),
                    duration,
                    error: error.to_string(),
                })
                .await;
            }
        }
        outcome
    }

    async fn emit(&self, event: TestEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

/// Substring match, or glob match when the filter contains `*`.
pub fn matches_filter(name: &str, filter: Option<&str>) -> bool {
    let Some(pattern) = filter else {
        return true;
    };
    if !pattern.contains('*') {
        return name.contains(pattern);
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let last = parts.len() - 1;
    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            let Some(tail) = rest.strip_prefix(part) else {
                return false;
            };
            rest = tail;
        } else if i == last {
            return rest.ends_with(part);
        } else {
            let Some(pos) = rest.find(part) else {
                return false;
            };
            rest = &rest[pos + part.len()..];
        }
    }
    true
}
