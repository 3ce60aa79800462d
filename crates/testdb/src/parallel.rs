//! Run setup tasks concurrently.

use std::thread;

/// A unit of work for [`parallel`].
pub type Task<'a> = Box<dyn FnOnce() + Send + 'a>;

/// Run every task on its own thread and return once all have finished.
///
/// Tasks may borrow from the caller. There is no ordering between tasks and
/// no result collection; tasks report back through whatever they captured.
/// If a task panics, the panic is resumed on the caller after the remaining
/// tasks have finished.
///
/// # Example
///
/// ```rust,ignore
/// let registry = ResourceRegistry::new();
/// let runtime = DockerCli::new();
/// let (mut pg, mut my) = (String::new(), String::new());
///
/// parallel(vec![
///     Box::new(|| pg = run_for_test(Dialect::Postgres, &runtime, &registry)),
///     Box::new(|| my = run_for_test(Dialect::MySql, &runtime, &registry)),
/// ]);
/// ```
pub fn parallel<'a>(tasks: Vec<Task<'a>>) {
    if tasks.is_empty() {
        return;
    }

    thread::scope(|scope| {
        let handles: Vec<_> = tasks.into_iter().map(|task| scope.spawn(task)).collect();

        let mut first_panic = None;
        for handle in handles {
            if let Err(payload) = handle.join() {
                first_panic.get_or_insert(payload);
            }
        }
        if let Some(payload) = first_panic {
            std::panic::resume_unwind(payload);
        }
    });
}
