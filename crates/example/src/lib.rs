//! Example suite run with the Canopy engine.
//!
//! The demo builds a small tree that exercises the interesting parts of the
//! engine: containers with setup and teardown, tests that share a database
//! and must not overlap, readers of a cache that may, a generator that
//! registers its tests while it runs, a skipped test and a failing one.
//!
//! # Architecture
//!
//! ```text
//! [engine:canopy-demo]
//! ├── database            opens a connection in `before`
//! │   ├── insert          writes "db"
//! │   └── query           writes "db"
//! ├── cache
//! │   ├── warm lookup     reads "cache"
//! │   └── cold lookup     reads "cache"
//! ├── generated           registers `square(1..=n)` while executing
//! ├── flaky network       skipped
//! └── broken invariant    fails
//! ```

mod context;

pub use context::DemoContext;

use canopy_engine::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Engine id of the demo tree.
pub const ENGINE_ID: &str = "canopy-demo";

type CheckFn = Box<dyn Fn(&DemoContext) -> NodeResult<()> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Nodes
// ─────────────────────────────────────────────────────────────────────────────

/// A leaf that runs one check.
pub struct Check {
    name: String,
    resources: Vec<ExclusiveResource>,
    skip: Option<String>,
    check: CheckFn,
}

impl Check {
    /// Creates a check that runs `check` against the context.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        check: impl Fn(&DemoContext) -> NodeResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            skip: None,
            check: Box::new(check),
        }
    }

    /// Declares a resource the check needs.
    #[must_use]
    pub fn using(mut self, resource: ExclusiveResource) -> Self {
        self.resources.push(resource);
        self
    }

    /// Marks the check as disabled.
    #[must_use]
    pub fn disabled(mut self, reason: impl Into<String>) -> Self {
        self.skip = Some(reason.into());
        self
    }
}

impl Node<DemoContext> for Check {
    fn prepare(&self, parent: &DemoContext) -> NodeResult<DemoContext> {
        Ok(parent.enter(&self.name))
    }

    fn should_be_skipped(&self, _ctx: &DemoContext) -> NodeResult<SkipResult> {
        Ok(self.skip.clone().map_or(SkipResult::Proceed, SkipResult::skip))
    }

    fn execute(
        &self,
        ctx: &DemoContext,
        _dynamic: &dyn DynamicTestExecutor<DemoContext>,
    ) -> NodeResult<DemoContext> {
        tracing::debug!(location = %ctx.location(), "running check");
        (self.check)(ctx)?;
        Ok(ctx.clone())
    }

    fn exclusive_resources(&self) -> Vec<ExclusiveResource> {
        self.resources.clone()
    }
}

/// A container with optional setup that opens a connection for its children.
pub struct Suite {
    name: String,
    connection: Option<String>,
}

impl Suite {
    /// Creates a plain container.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: None,
        }
    }

    /// Opens `connection` in `before` and closes it in `after`.
    #[must_use]
    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }
}

impl Node<DemoContext> for Suite {
    fn prepare(&self, parent: &DemoContext) -> NodeResult<DemoContext> {
        Ok(parent.enter(&self.name))
    }

    fn before(&self, ctx: &DemoContext) -> NodeResult<DemoContext> {
        let mut ctx = ctx.clone();
        if let Some(connection) = &self.connection {
            tracing::info!(suite = %self.name, %connection, "connection opened");
            ctx.connection = Some(connection.clone());
        }
        Ok(ctx)
    }

    fn after(&self, ctx: &DemoContext) -> NodeResult<()> {
        if let Some(connection) = &ctx.connection {
            tracing::info!(suite = %self.name, %connection, "connection closed");
        }
        Ok(())
    }
}

/// A container that discovers its tests while executing.
pub struct Generator {
    name: String,
    count: u32,
}

impl Generator {
    /// Creates a generator of `count` checks that `n²` is the sum of the
    /// first `n` odd numbers.
    #[must_use]
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

impl Node<DemoContext> for Generator {
    fn prepare(&self, parent: &DemoContext) -> NodeResult<DemoContext> {
        Ok(parent.enter(&self.name))
    }

    fn execute(
        &self,
        ctx: &DemoContext,
        dynamic: &dyn DynamicTestExecutor<DemoContext>,
    ) -> NodeResult<DemoContext> {
        let parent = UniqueId::for_engine(ENGINE_ID).append("generator", &self.name);
        for n in 1..=self.count {
            let name = format!("square({n})");
            let check = Check::new(name.clone(), move |_| {
                let square = n.checked_mul(n).ok_or_else(|| Failure::msg("overflow"))?;
                let odd_sum: u32 = (0..n).map(|k| 2 * k + 1).sum();
                if odd_sum == square {
                    Ok(())
                } else {
                    Err(Failure::msg(format!("sum of {n} odd numbers is {odd_sum}, not {square}")))
                }
            });
            dynamic.execute(TestDescriptor::test(
                parent.append("dynamic", n.to_string()),
                name,
                check,
            ));
        }
        dynamic.await_finished()?;
        Ok(ctx.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tree
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the demo tree.
#[must_use]
pub fn demo_tree() -> Arc<TestDescriptor<DemoContext>> {
    let engine = UniqueId::for_engine(ENGINE_ID);
    let root = TestDescriptor::container(engine.clone(), ENGINE_ID, Suite::new(ENGINE_ID));

    let database = TestDescriptor::container(
        engine.append("suite", "database"),
        "database",
        Suite::new("database").with_connection("sqlite::memory:"),
    );
    for name in ["insert", "query"] {
        let check = Check::new(name, |ctx| {
            std::thread::sleep(Duration::from_millis(20));
            ctx.connection
                .as_ref()
                .map(|_| ())
                .ok_or_else(|| Failure::msg("no connection"))
        })
        .using(ExclusiveResource::read_write("db"));
        database.add_child(TestDescriptor::test(
            database.unique_id().append("test", name),
            name,
            check,
        ));
    }

    let cache = TestDescriptor::container(engine.append("suite", "cache"), "cache", Suite::new("cache"));
    for name in ["warm lookup", "cold lookup"] {
        let check = Check::new(name, |_| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(())
        })
        .using(ExclusiveResource::read("cache"));
        cache.add_child(TestDescriptor::test(
            cache.unique_id().append("test", name),
            name,
            check,
        ));
    }

    let generated = TestDescriptor::container(
        engine.append("generator", "generated"),
        "generated",
        Generator::new("generated", 5),
    );

    let flaky = TestDescriptor::test(
        engine.append("test", "flaky network"),
        "flaky network",
        Check::new("flaky network", |_| Ok(())).disabled("network unavailable in CI"),
    );
    let broken = TestDescriptor::test(
        engine.append("test", "broken invariant"),
        "broken invariant",
        Check::new("broken invariant", |_| Err(Failure::msg("1 + 1 != 3"))),
    );

    root.add_child(database)
        .add_child(cache)
        .add_child(generated)
        .add_child(flaky)
        .add_child(broken);
    root
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome counting
// ─────────────────────────────────────────────────────────────────────────────

/// Totals of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcomes {
    /// Nodes that finished successfully.
    pub successful: usize,
    /// Nodes that failed.
    pub failed: usize,
    /// Nodes that were aborted.
    pub aborted: usize,
    /// Nodes that were skipped.
    pub skipped: usize,
    /// Nodes registered while their parent ran.
    pub dynamic: usize,
}

/// A listener that counts outcomes.
#[derive(Debug, Default)]
pub struct OutcomeCounter {
    outcomes: Mutex<Outcomes>,
}

impl OutcomeCounter {
    /// Creates a zeroed counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the totals so far.
    #[must_use]
    pub fn outcomes(&self) -> Outcomes {
        *self.outcomes.lock()
    }
}

impl EngineExecutionListener for OutcomeCounter {
    fn dynamic_test_registered(&self, _descriptor: &dyn Descriptor) {
        self.outcomes.lock().dynamic += 1;
    }

    fn execution_skipped(&self, _descriptor: &dyn Descriptor, _reason: &str) {
        self.outcomes.lock().skipped += 1;
    }

    fn execution_finished(&self, _descriptor: &dyn Descriptor, result: &TestExecutionResult) {
        let mut outcomes = self.outcomes.lock();
        match result.status() {
            Status::Successful => outcomes.successful += 1,
            Status::Failed => outcomes.failed += 1,
            Status::Aborted => outcomes.aborted += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_engine::testkit::EventRecorder;

    fn run(params: ConfigurationParameters) -> (Outcomes, Arc<EventRecorder>) {
        let counter = Arc::new(OutcomeCounter::new());
        let recorder = Arc::new(EventRecorder::new());
        let registry = ListenerRegistry::new();
        registry.register("counter", counter.clone()).unwrap();
        registry.register("recorder", recorder.clone()).unwrap();

        let request = ExecutionRequest::new(demo_tree(), Arc::new(registry), DemoContext::default())
            .with_configuration(params);
        HierarchicalTestExecutor::new(request).execute().unwrap();
        (counter.outcomes(), recorder)
    }

    #[test]
    fn demo_tree_has_expected_outcomes_sequentially() {
        let (outcomes, recorder) = run(ConfigurationParameters::new());

        assert!(recorder.is_well_formed(), "{:?}", recorder.violations());
        assert_eq!(
            outcomes,
            Outcomes {
                // root, database, insert, query, cache, 2 lookups, generated, 5 squares
                successful: 13,
                failed: 1,
                aborted: 0,
                skipped: 1,
                dynamic: 5,
            }
        );
    }

    #[test]
    fn demo_tree_has_expected_outcomes_in_parallel() {
        let params = ConfigurationParameters::new()
            .with("canopy.execution.parallel.enabled", "true")
            .with("canopy.execution.parallel.mode.default", "concurrent")
            .with("canopy.execution.parallel.config.strategy", "fixed")
            .with("canopy.execution.parallel.config.fixed.parallelism", "3");

        let (outcomes, recorder) = run(params);

        assert!(recorder.is_well_formed(), "{:?}", recorder.violations());
        assert_eq!(outcomes.successful, 13);
        assert_eq!(outcomes.failed, 1);
    }
}
