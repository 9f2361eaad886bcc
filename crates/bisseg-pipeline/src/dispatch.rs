//! Parallel dispatch of independent strip jobs.
//!
//! Tiled segmentation turns each strip into a job that shares nothing
//! with the others. This module defines the [`ParallelMap`] trait for
//! pluggable executors and the [`DispatchKind`] enum for runtime
//! selection. Results always come back in input order, and a job that
//! panics is reported as a failed item instead of unwinding into the
//! caller.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Selects how strip jobs are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchKind {
    /// Run every job in order on the calling thread.
    Sequential,

    /// Run jobs on a dedicated rayon pool.
    ///
    /// `workers == 0` lets rayon pick the thread count (one per core
    /// unless `RAYON_NUM_THREADS` says otherwise).
    ThreadPool {
        /// Number of worker threads, 0 for the rayon default.
        workers: usize,
    },
}

impl Default for DispatchKind {
    fn default() -> Self {
        Self::ThreadPool { workers: 0 }
    }
}

/// Order-preserving map over independent jobs.
pub trait ParallelMap {
    /// Apply `job` to every item and return the results in input order.
    ///
    /// A job that panics yields `Err` with the panic message.
    fn map_ordered<T, R, F>(&self, items: Vec<T>, job: F) -> Vec<Result<R, String>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send;
}

impl ParallelMap for DispatchKind {
    fn map_ordered<T, R, F>(&self, items: Vec<T>, job: F) -> Vec<Result<R, String>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        match *self {
            Self::Sequential => run_sequential(items, &job),
            Self::ThreadPool { workers } => {
                match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                    Ok(pool) => pool.install(|| {
                        items
                            .into_par_iter()
                            .map(|item| run_caught(&job, item))
                            .collect()
                    }),
                    Err(err) => {
                        log::warn!("thread pool unavailable ({err}), running strips sequentially");
                        run_sequential(items, &job)
                    }
                }
            }
        }
    }
}

fn run_sequential<T, R, F>(items: Vec<T>, job: &F) -> Vec<Result<R, String>>
where
    F: Fn(T) -> R,
{
    items.into_iter().map(|item| run_caught(job, item)).collect()
}

fn run_caught<T, R, F>(job: &F, item: T) -> Result<R, String>
where
    F: Fn(T) -> R,
{
    catch_unwind(AssertUnwindSafe(|| job(item))).map_err(|payload| panic_message(&*payload))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "job panicked".to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn default_is_thread_pool_with_rayon_default_size() {
        assert_eq!(DispatchKind::default(), DispatchKind::ThreadPool { workers: 0 });
    }

    #[test]
    fn sequential_preserves_order() {
        let out = DispatchKind::Sequential.map_ordered(vec![3, 1, 2], |x| x * 10);
        let values: Vec<i32> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![30, 10, 20]);
    }

    #[test]
    fn thread_pool_preserves_order() {
        let items: Vec<u64> = (0..200).collect();
        let out = DispatchKind::ThreadPool { workers: 4 }.map_ordered(items, |x| x * x);
        let values: Vec<u64> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, (0..200).map(|x| x * x).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_job_becomes_error() {
        for kind in [DispatchKind::Sequential, DispatchKind::ThreadPool { workers: 2 }] {
            let out = kind.map_ordered(vec![1, 2, 3], |x| {
                if x == 2 {
                    panic!("strip {x} exploded");
                }
                x
            });
            assert_eq!(out[0], Ok(1));
            assert_eq!(out[1], Err("strip 2 exploded".to_owned()));
            assert_eq!(out[2], Ok(3));
        }
    }

    #[test]
    fn serde_uses_kind_tag() {
        let json = serde_json::to_string(&DispatchKind::ThreadPool { workers: 3 }).unwrap();
        assert_eq!(json, r#"{"kind":"thread_pool","workers":3}"#);
        let back: DispatchKind = serde_json::from_str(r#"{"kind":"sequential"}"#).unwrap();
        assert_eq!(back, DispatchKind::Sequential);
    }
}
