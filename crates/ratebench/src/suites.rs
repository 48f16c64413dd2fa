//! The built-in scenario run by the `run` command.

use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use tracing::warn;

use crate::{
    config::BenchConfig,
    outcome::{OperationOutput, TestOutput},
    scenario::{TestCase, TestCategory, TestContext, TestSuite},
    sim::{Deployment, Role, SimError},
};

pub const ROLES: &str = "roles";
pub const ACCESS: &str = "access";
pub const STORAGE: &str = "storage";
pub const RESPONSIVENESS: &str = "responsiveness";
pub const CONCURRENCY: &str = "concurrency";

const ACCESS_TTL: Duration = Duration::from_secs(3600);
const LOAD_RECORD_BYTES: usize = 256;

type Ctx<'a> = TestContext<'a, Deployment>;

/// Builds every category, with sweeps sized from `config.load`.
pub fn build_suite(config: &BenchConfig) -> TestSuite<Deployment> {
    TestSuite::new()
        .category(roles())
        .category(access())
        .category(storage(&config.load.data_sizes_kb))
        .category(responsiveness(&config.load.rates, config.load.requests_per_rate))
        .category(concurrency(&config.load.batch_sizes))
}

fn roles() -> TestCategory<Deployment> {
    TestCategory::new(ROLES)
        .describe("Role registry administration")
        .test(TestCase::new("verify_enrolled_roles", |ctx| Box::pin(verify_enrolled_roles(ctx))))
        .test(
            TestCase::new("assign_auditor_role", |ctx| Box::pin(assign_auditor_role(ctx)))
                .describe("Admin grants a second role to the patient"),
        )
        .test(
            TestCase::new("reject_unauthorized_assignment", |ctx| {
                Box::pin(reject_unauthorized_assignment(ctx))
            })
            .describe("Non-admin callers cannot assign roles"),
        )
}

fn access() -> TestCategory<Deployment> {
    TestCategory::new(ACCESS)
        .describe("Time-limited access grants")
        .test(TestCase::new("grant_provider_access", |ctx| Box::pin(grant_provider_access(ctx))))
        .test(TestCase::new("check_granted_access", |ctx| Box::pin(check_access_is(ctx, true))))
        .advance_time(ACCESS_TTL + Duration::from_secs(1))
        .test(TestCase::new("check_expired_access", |ctx| Box::pin(check_access_is(ctx, false))))
}

fn storage(sizes_kb: &[u32]) -> TestCategory<Deployment> {
    let mut category = TestCategory::new(STORAGE).describe("Record storage cost by payload size");
    for &kb in sizes_kb {
        category = category
            .test(TestCase::new(format!("store_{kb}kb"), move |ctx| Box::pin(store_record(ctx, kb))));
    }
    category.test(TestCase::new("read_stored_record", |ctx| Box::pin(read_stored_record(ctx))))
}

fn responsiveness(rates: &[f64], requests: usize) -> TestCategory<Deployment> {
    let mut category =
        TestCategory::new(RESPONSIVENESS).describe("Latency and throughput by request rate");
    for &rate in rates {
        category = category.test(
            TestCase::new(format!("rate_{rate}"), move |ctx| Box::pin(rate_sweep(ctx, rate, requests)))
                .drives_load(),
        );
    }
    category
}

fn concurrency(batch_sizes: &[usize]) -> TestCategory<Deployment> {
    let mut category =
        TestCategory::new(CONCURRENCY).describe("Completion time by concurrent batch size");
    for &size in batch_sizes {
        category = category.test(
            TestCase::new(format!("batch_{size}"), move |ctx| Box::pin(batch_sweep(ctx, size))).drives_load(),
        );
    }
    category
}

fn record_id(ctx: &Ctx<'_>) -> String {
    format!("record-{}", ctx.round())
}

async fn verify_enrolled_roles(ctx: &Ctx<'_>) -> Result<TestOutput> {
    let deployment = ctx.backend();
    let mut checked = 0;
    for (role, principal) in deployment.principals.iter() {
        let held = deployment.backend.has_role(principal, *role).await?;
        ensure!(held, "{principal} is missing role {role}");
        checked += 1;
    }
    Ok(TestOutput::new().field("principals", checked))
}

async fn assign_auditor_role(ctx: &Ctx<'_>) -> Result<TestOutput> {
    let deployment = ctx.backend();
    let admin = deployment.principals.get(Role::Admin)?;
    let patient = deployment.principals.get(Role::Patient)?;

    let receipt = deployment
        .backend
        .assign_role(admin, patient, Role::Auditor)
        .await
        .context("assignRole(patient, auditor)")?;
    Ok(TestOutput::new().extend(receipt.into_payload()))
}

async fn reject_unauthorized_assignment(ctx: &Ctx<'_>) -> Result<TestOutput> {
    let deployment = ctx.backend();
    let patient = deployment.principals.get(Role::Patient)?;

    match deployment.backend.assign_role(patient, patient, Role::Admin).await {
        Err(SimError::Unauthorized { .. }) => Ok(TestOutput::new().field("rejected", true)),
        Err(e) => Err(e).context("assignRole(patient, admin)"),
        Ok(_) => bail!("patient was able to grant itself the admin role"),
    }
}

async fn grant_provider_access(ctx: &Ctx<'_>) -> Result<TestOutput> {
    let deployment = ctx.backend();
    let patient = deployment.principals.get(Role::Patient)?;
    let provider = deployment.principals.get(Role::Provider)?;

    let receipt = deployment
        .backend
        .grant_access(patient, provider, &record_id(ctx), ACCESS_TTL)
        .await
        .context("grantAccess")?;
    Ok(TestOutput::new().extend(receipt.into_payload()).field("ttlSecs", ACCESS_TTL.as_secs()))
}

async fn check_access_is(ctx: &Ctx<'_>, expected: bool) -> Result<TestOutput> {
    let deployment = ctx.backend();
    let provider = deployment.principals.get(Role::Provider)?;

    let granted = deployment.backend.check_access(provider, &record_id(ctx)).await?;
    ensure!(granted == expected, "expected access={expected} at t={}, got {granted}", deployment.backend.now());
    Ok(TestOutput::new().field("granted", granted))
}

async fn store_record(ctx: &Ctx<'_>, size_kb: u32) -> Result<TestOutput> {
    let deployment = ctx.backend();
    let provider = deployment.principals.get(Role::Provider)?;
    let data = vec![0xAB; size_kb as usize * 1024];

    let receipt = deployment
        .backend
        .store_record(provider, &format!("{}-{size_kb}kb", record_id(ctx)), &data)
        .await
        .with_context(|| format!("storeRecord({size_kb}KB)"))?;
    Ok(TestOutput::new().extend(receipt.into_payload()).field("dataSizeKb", size_kb))
}

async fn read_stored_record(ctx: &Ctx<'_>) -> Result<TestOutput> {
    let deployment = ctx.backend();
    let provider = deployment.principals.get(Role::Provider)?;
    let id = format!("{}-read", record_id(ctx));

    deployment.backend.store_record(provider, &id, b"ratebench").await?;
    let size = deployment.backend.read_record(provider, &id).await?;
    ensure!(size == 9, "read back {size} bytes, stored 9");
    Ok(TestOutput::new().field("bytes", size))
}

/// Stores small records at `rate` per second and reports the load summary.
///
/// Failed calls only lower `successRate`; the sweep itself still reports its
/// key so the rate shows up in every round that ran it.
async fn rate_sweep(ctx: &Ctx<'_>, rate: f64, requests: usize) -> Result<TestOutput> {
    let deployment = ctx.backend();
    let provider = deployment.principals.get(Role::Provider)?;
    let data = vec![0x5A; LOAD_RECORD_BYTES];
    let data = data.as_slice();

    let report = ctx
        .load()
        .run(&format!("rate_{rate}"), ctx.category(), rate, requests, |i| {
            let id = format!("load-{rate}-{i}");
            async move { deployment.backend.store_record(provider, &id, data).await }
        })
        .await?;

    if report.successful() == 0 {
        warn!(rate, requests, "Every call in the sweep failed");
    }
    let total_cost: f64 = report.outcomes.iter().filter_map(|o| o.resource_cost()).sum();
    Ok(TestOutput::new().cost(total_cost).extend(report.summary_payload()))
}

/// Issues `size` stores at once and reports how long the batch took.
async fn batch_sweep(ctx: &Ctx<'_>, size: usize) -> Result<TestOutput> {
    let deployment = ctx.backend();
    let provider = deployment.principals.get(Role::Provider)?;
    let data = vec![0x3C; LOAD_RECORD_BYTES];
    let data = data.as_slice();

    let report = ctx
        .load()
        .run_batch(&format!("batch_{size}"), ctx.category(), size, |i| {
            let id = format!("batch-{size}-{i}");
            async move { deployment.backend.store_record(provider, &id, data).await }
        })
        .await?;

    if report.successful() == 0 {
        warn!(batch_size = size, "Every call in the batch failed");
    }
    let total_cost: f64 = report.outcomes.iter().filter_map(|o| o.resource_cost()).sum();
    Ok(TestOutput::new().cost(total_cost).extend(report.summary_payload()).field("batchSize", size))
}
