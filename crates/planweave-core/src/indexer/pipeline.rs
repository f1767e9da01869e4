//! Parallel parsing with Rayon and the run-wide deadline.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::debug;

use crate::errors::{EngineError, EngineResult};
use crate::indexer::parser::ParserRegistry;
use crate::models::ParseResult;

/// Overall time budget for a decomposition run. Checked cooperatively
/// before each phase and inside each parse job.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    pub fn check(&self) -> EngineResult<()> {
        if self.expired() {
            return Err(EngineError::Timeout {
                elapsed_ms: self.elapsed_ms(),
                budget_ms: self.budget.as_millis() as u64,
            });
        }
        Ok(())
    }
}

/// One file to parse, with the steps that asked for it.
#[derive(Clone, Debug)]
pub struct ParseJob {
    pub path: String,
    pub content: String,
    pub steps: Vec<usize>,
}

fn parse_job(
    registry: &ParserRegistry,
    job: &ParseJob,
    deadline: &Deadline,
) -> EngineResult<ParseResult> {
    deadline.check()?;
    let result = registry.parse(&job.path, &job.content);
    debug!(
        path = %job.path,
        steps = ?job.steps,
        symbols = result.symbols.len(),
        references = result.references.len(),
        "parsed file"
    );
    Ok(result)
}

/// Parse every job on a pool of `workers` threads. Results come back in
/// job order; the first deadline expiry aborts the batch.
pub fn parallel_parse(
    registry: &ParserRegistry,
    jobs: &[ParseJob],
    workers: usize,
    deadline: &Deadline,
) -> EngineResult<Vec<ParseResult>> {
    if jobs.is_empty() {
        return Ok(vec![]);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();

    match pool {
        Ok(pool) => pool.install(|| {
            jobs.par_iter()
                .map(|job| parse_job(registry, job, deadline))
                .collect()
        }),
        Err(_) => {
            // Fallback to sequential
            jobs.iter()
                .map(|job| parse_job(registry, job, deadline))
                .collect()
        }
    }
}
