use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tracing::{info, info_span};

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::fabric::Fabric;
use crate::world::{panic_message, World};

/// Runs a program on every process of an in-process group.
pub struct Cluster;

enum Outcome<R> {
    Done(R),
    Panicked(String),
}

impl Cluster {
    /// Start `config.nprocs` processes, run `f` on each (SPMD), then fence and
    /// tear down. Results are returned in rank order.
    ///
    /// Fails if any process panicked or the group aborted.
    pub fn run<R, F>(config: RuntimeConfig, f: F) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(&World) -> R + Sync,
    {
        config.validate()?;
        let nprocs = config.nprocs;
        info!(nprocs, "starting process group");
        let fabric = Arc::new(Fabric::new(nprocs));

        let outcomes: Vec<Outcome<R>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..nprocs)
                .map(|rank| {
                    let fabric = Arc::clone(&fabric);
                    let config = config.clone();
                    let f = &f;
                    thread::Builder::new()
                        .name(format!("rank-{}", rank))
                        .spawn_scoped(scope, move || run_rank(rank, config, fabric, f))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle {
                    Ok(h) => h
                        .join()
                        .unwrap_or_else(|p| Outcome::Panicked(panic_message(p.as_ref()))),
                    Err(e) => Outcome::Panicked(format!("failed to spawn process thread: {}", e)),
                })
                .collect()
        });

        let mut results = Vec::with_capacity(nprocs);
        for (rank, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Outcome::Done(r) => results.push(r),
                Outcome::Panicked(msg) => return Err(RuntimeError::RankPanicked { rank, msg }),
            }
        }
        if let Some(e) = fabric.abort_error() {
            return Err(e);
        }
        info!(nprocs, "process group finished");
        Ok(results)
    }
}

fn run_rank<R, F>(rank: usize, config: RuntimeConfig, fabric: Arc<Fabric>, f: &F) -> Outcome<R>
where
    F: Fn(&World) -> R,
{
    let _span = info_span!("rank", rank).entered();
    let world = World::new(rank, config, Arc::clone(&fabric));
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| f(&world))) {
        Ok(r) => {
            if !fabric.is_aborted() {
                // Errors here are already recorded as the group abort.
                let _ = world.fence();
            }
            Outcome::Done(r)
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            fabric.abort(rank, format!("process panicked: {}", msg));
            Outcome::Panicked(msg)
        }
    };
    world.shutdown();
    outcome
}
