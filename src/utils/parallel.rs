use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info};
use rayon::prelude::*;

/// Thread-pool setup and progress-reporting parallel map shared by the batch
/// operations.
pub trait ParallelProcessor {
    /// Configures the global rayon pool. `threads` of `None` or zero means one
    /// thread per CPU. A pool that is already configured is left as is.
    fn init_parallel_processing(threads: Option<usize>) -> usize {
        let wanted = threads.filter(|n| *n > 0).unwrap_or_else(num_cpus::get);
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(wanted).build_global() {
            debug!("Global thread pool already configured: {}", e);
        }
        let threads = rayon::current_num_threads();
        info!("Using {} threads for processing", threads);
        threads
    }

    fn get_progress_counter() -> AtomicUsize {
        AtomicUsize::new(0)
    }

    /// Maps `items` in parallel, preserving order, and logs progress every
    /// hundred items and at the end.
    fn process_with_progress<T, R, F>(label: &str, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        let total = items.len();
        let progress = Self::get_progress_counter();
        items
            .into_par_iter()
            .map(|item| {
                let result = f(item);
                let processed = progress.fetch_add(1, Ordering::SeqCst) + 1;
                if processed % 100 == 0 || processed == total {
                    info!(
                        "{} progress: {}/{} ({:.1}%)",
                        label,
                        processed,
                        total,
                        (processed as f64 / total as f64) * 100.0
                    );
                }
                result
            })
            .collect()
    }
}
